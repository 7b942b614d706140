use gardener_core::types::TrackedIssue;

/// Instruction for a worker run: fix exactly what the issue describes,
/// inside the current checkout, without committing.
pub fn build_worker_instruction(issue: &TrackedIssue, base_branch: &str) -> String {
    let mut s = String::new();
    s.push_str(&format!(
        "You are working in a dedicated git checkout branched off `{base_branch}`. \
         Implement the improvement described below. Edit files in place; do NOT run \
         git commit, push, or change branches. Keep the change minimal and focused.\n\n"
    ));
    s.push_str(&format!("Task: {}\n\n{}\n\n", issue.title, issue.body));
    s.push_str(
        "When you are done, reply with a single short paragraph summarizing what you \
         changed and why. If you could not complete the task, start your reply with \
         FAILED: followed by the reason.",
    );
    s
}

/// Instruction for a discovery run: explore the repository read-only and
/// propose improvement tasks in a fixed block format.
pub fn build_discovery_instruction(
    exclude_paths: &[String],
    max_tasks: usize,
    existing_titles: &[String],
) -> String {
    let mut s = String::new();
    s.push_str(
        "First, thoroughly explore this repository before making any suggestions. \
         Use Read to examine key source files, Grep to search for patterns, and Glob \
         to discover the project structure. Understand the architecture and the \
         current state of the code.\n\n",
    );
    s.push_str(&format!(
        "Then propose up to {max_tasks} concrete, self-contained improvement tasks. \
         Good candidates: missing tests, unclear error handling, dead code, \
         documentation gaps, small refactors. Each task must be completable by one \
         engineer in one sitting.\n"
    ));

    if !exclude_paths.is_empty() {
        s.push_str("\nDo not propose changes under these paths:\n");
        for path in exclude_paths {
            s.push_str(&format!("- {path}\n"));
        }
    }

    if !existing_titles.is_empty() {
        s.push_str("\nThese tasks are already tracked; do not propose them again:\n");
        for title in existing_titles {
            s.push_str(&format!("- {title}\n"));
        }
    }

    s.push_str(
        "\nFor each task, output EXACTLY this format (one block per task):\n\n\
         TASK_START\n\
         Title: <short imperative title, max 80 chars>\n\
         Description: <2-4 sentences explaining what to change and why>\n\
         Category: <refactor | test | docs | fix | chore>\n\
         Priority: <1-5, 1 is highest>\n\
         Complexity: <low | medium | high>\n\
         Paths: <comma-separated repository paths this task touches>\n\
         Related: <comma-separated issue numbers this overlaps with, or none>\n\
         TASK_END\n\n\
         Output ONLY the task blocks above. No other text.",
    );
    s
}

// ── Block Parsing ────────────────────────────────────────────────────────

pub fn extract_blocks(text: &str, start_marker: &str, end_marker: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut remaining = text;
    while let Some(start) = remaining.find(start_marker) {
        remaining = &remaining[start + start_marker.len()..];
        if let Some(end) = remaining.find(end_marker) {
            blocks.push(remaining[..end].trim().to_string());
            remaining = &remaining[end + end_marker.len()..];
        } else {
            break;
        }
    }
    blocks
}

pub fn extract_field(block: &str, field: &str) -> Option<String> {
    let mut lines = block.lines().peekable();
    while let Some(line) = lines.next() {
        if let Some(rest) = line.strip_prefix(field) {
            let mut parts = vec![rest.trim()];
            // Continuation lines belong to this field until the next key.
            while let Some(&next) = lines.peek() {
                if looks_like_field_key(next) {
                    break;
                }
                let trimmed = next.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed);
                }
                lines.next();
            }
            let val: Vec<&str> = parts.into_iter().filter(|s| !s.is_empty()).collect();
            if !val.is_empty() {
                return Some(val.join("\n"));
            }
        }
    }
    None
}

fn looks_like_field_key(line: &str) -> bool {
    let trimmed = line.trim();
    if let Some(colon) = trimmed.find(':') {
        let key = &trimmed[..colon];
        !key.is_empty()
            && !key.contains(' ')
            && key.chars().next().is_some_and(char::is_alphabetic)
    } else {
        false
    }
}
