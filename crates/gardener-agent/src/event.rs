use serde::Deserialize;

/// One NDJSON message from the agent CLI (`--output-format stream-json`).
/// Only the fields the daemon consumes are modeled; everything else falls
/// through to `Unknown`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Assistant(AssistantEvent),
    Result(ResultEvent),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct AssistantEvent {
    pub message: Option<AssistantMessage>,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    pub content: Option<Vec<ContentBlock>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Unknown,
}

/// Final message, emitted once when the agent finishes.
#[derive(Debug, Deserialize)]
pub struct ResultEvent {
    pub result: Option<String>,
    pub is_error: Option<bool>,
}

/// What one full agent stream boiled down to.
#[derive(Debug, Default)]
pub struct StreamSummary {
    /// Result text, falling back to concatenated assistant text when the
    /// final turn was a tool call.
    pub text: String,
    pub is_error: bool,
}

pub fn summarize_stream(data: &str) -> StreamSummary {
    let mut summary = StreamSummary::default();
    let mut assistant_text = String::new();

    for line in data.lines() {
        if line.is_empty() {
            continue;
        }
        let event: AgentEvent = match serde_json::from_str(line) {
            Ok(e) => e,
            Err(_) => continue,
        };
        match event {
            AgentEvent::Assistant(e) => {
                let blocks = e.message.and_then(|m| m.content).unwrap_or_default();
                for block in blocks {
                    if let ContentBlock::Text { text } = block {
                        if !assistant_text.is_empty() {
                            assistant_text.push('\n');
                        }
                        assistant_text.push_str(&text);
                    }
                }
            }
            AgentEvent::Result(e) => {
                summary.is_error = e.is_error.unwrap_or(false);
                if let Some(text) = e.result {
                    summary.text = text;
                }
            }
            AgentEvent::Unknown => {}
        }
    }

    if summary.text.is_empty() {
        summary.text = assistant_text;
    }
    summary
}
