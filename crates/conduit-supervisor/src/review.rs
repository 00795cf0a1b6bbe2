// SPDX-License-Identifier: MIT
//! Formats a `submit_review` request (§4.7, §6.4) into the synthetic prompt
//! handed to the ephemeral review session: the accumulated file changes as
//! unified diffs, followed by the reviewer's comments anchored to file/line
//! where given.

use conduit_state::{format_unified_diff, FileChange};

use crate::types::ReviewComment;

pub fn format_review_prompt(changes: &[FileChange], comments: &[ReviewComment]) -> String {
    let mut out = String::new();
    out.push_str(
        "Review the following changes made during this session. \
         Address each reviewer comment in context; make further edits only where a comment asks for one.\n\n",
    );

    if changes.is_empty() {
        out.push_str("No file changes were recorded this session.\n\n");
    } else {
        for change in changes {
            out.push_str(&format!("--- {}\n", change.file_path));
            out.push_str(&format_unified_diff(&change.hunks));
            out.push('\n');
        }
    }

    if !comments.is_empty() {
        out.push_str("Reviewer comments:\n");
        for comment in comments {
            let location = match (&comment.file_path, comment.line_number, comment.hunk_index) {
                (Some(path), Some(line), _) => format!("{path}:{line}"),
                (Some(path), None, Some(hunk)) => format!("{path} (hunk {hunk})"),
                (Some(path), None, None) => path.clone(),
                (None, _, _) => "(general)".to_string(),
            };
            out.push_str(&format!("- [{}] {}: {}\n", comment.comment_type, location, comment.text));
        }
    }

    out
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
