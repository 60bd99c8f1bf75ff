use trackback_core::{ChangeOp, ChangeRecord, FieldValue, Snapshot};

/// Render a change record as a human-readable sentence for the activity
/// feed. Pure and total: any well-formed record maps to some sentence,
/// with "made changes" as the generic fallback.
pub fn describe(record: &ChangeRecord) -> String {
    let label = entity_label(record);

    match record.op {
        ChangeOp::Create => format!("created {label}"),
        ChangeOp::Delete => format!("deleted {label}"),
        ChangeOp::Update => {
            let (before, after) = match (&record.before, &record.after) {
                (Some(b), Some(a)) => (b, a),
                _ => return format!("made changes to {label}"),
            };
            describe_update(&label, record.entity_kind.as_str(), before, after)
        }
    }
}

fn describe_update(label: &str, kind: &str, before: &Snapshot, after: &Snapshot) -> String {
    let touched = before.changed_keys(after);

    // Fixed rule set, checked in priority order; the first recognized
    // field wins.
    if touched.iter().any(|k| k == "status") {
        return format!(
            "changed status of {label} from {} to {}",
            render(before.get("status")),
            render(after.get("status")),
        );
    }
    if let Some(key) = touched.iter().find(|k| *k == "title" || *k == "name") {
        return format!(
            "renamed {kind} from \"{}\" to \"{}\"",
            render(before.get(key)),
            render(after.get(key)),
        );
    }
    if touched.iter().any(|k| k == "assignee") {
        let from = after_text(before.get("assignee"));
        let to = after_text(after.get("assignee"));
        return match (from, to) {
            (None, Some(to)) => format!("assigned {label} to {to}"),
            (Some(_), None) => format!("unassigned {label}"),
            (Some(from), Some(to)) => format!("reassigned {label} from {from} to {to}"),
            (None, None) => format!("made changes to {label}"),
        };
    }
    if touched.iter().any(|k| k == "priority") {
        return format!(
            "changed priority of {label} from {} to {}",
            render(before.get("priority")),
            render(after.get("priority")),
        );
    }
    if touched.iter().any(|k| k == "due_date") {
        return format!("changed due date of {label}");
    }

    format!("made changes to {label}")
}

/// "issue \"Fix bug\"" when a title-ish field is captured, else just "issue".
fn entity_label(record: &ChangeRecord) -> String {
    let snapshot = record.after.as_ref().or(record.before.as_ref());
    let title = snapshot.and_then(|s| {
        s.get("title")
            .or_else(|| s.get("name"))
            .and_then(FieldValue::as_text)
    });
    match title {
        Some(title) => format!("{} \"{title}\"", record.entity_kind),
        None => record.entity_kind.to_string(),
    }
}

fn render(value: Option<&FieldValue>) -> String {
    match value {
        None | Some(FieldValue::Null) => "none".to_string(),
        Some(FieldValue::Text(s)) => s.clone(),
        Some(FieldValue::Integer(n)) => n.to_string(),
        Some(FieldValue::Float(f)) => f.to_string(),
        Some(FieldValue::Boolean(b)) => b.to_string(),
        Some(FieldValue::Timestamp(ms)) => format!("{ms}ms"),
    }
}

fn after_text(value: Option<&FieldValue>) -> Option<&str> {
    match value {
        Some(FieldValue::Text(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}
