use cluster_shard::{NodeId, Reply, Value};
use serde_json::json;
use std::collections::BTreeMap;

pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Int(n) => json!(n),
        Value::BulkString(bytes) => json!(String::from_utf8_lossy(bytes)),
        Value::SimpleString(text) => json!(text),
        Value::Okay => json!("OK"),
        Value::Double(n) => json!(n),
        Value::Boolean(b) => json!(b),
        Value::Array(items) | Value::Set(items) => {
            serde_json::Value::Array(items.iter().map(to_json).collect())
        }
        Value::Map(pairs) => serde_json::Value::Object(
            pairs
                .iter()
                .map(|(k, v)| (plain(k), to_json(v)))
                .collect(),
        ),
        other => json!(format!("{:?}", other)),
    }
}

pub fn reply_to_json(reply: &Reply) -> serde_json::Value {
    match reply {
        Reply::Value(value) => to_json(value),
        Reply::Nodes(nodes) => serde_json::Value::Object(
            nodes
                .iter()
                .map(|(node, value)| {
                    let value = value.as_ref().map_or(serde_json::Value::Null, to_json);
                    (node.to_string(), value)
                })
                .collect(),
        ),
    }
}

/// `redis-cli` style text.
pub fn to_text(value: &Value) -> String {
    let mut out = String::new();
    write_text(value, 0, &mut out);
    out
}

fn write_text(value: &Value, indent: usize, out: &mut String) {
    match value {
        Value::Nil => out.push_str("(nil)"),
        Value::Int(n) => out.push_str(&format!("(integer) {}", n)),
        Value::BulkString(bytes) => out.push_str(&format!("{:?}", String::from_utf8_lossy(bytes))),
        Value::SimpleString(text) => out.push_str(text),
        Value::Okay => out.push_str("OK"),
        Value::Array(items) | Value::Set(items) if items.is_empty() => {
            out.push_str("(empty array)")
        }
        Value::Array(items) | Value::Set(items) => {
            let width = items.len().to_string().len();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push('\n');
                    out.push_str(&" ".repeat(indent));
                }
                let label = format!("{:>width$}) ", i + 1, width = width);
                out.push_str(&label);
                write_text(item, indent + label.len(), out);
            }
        }
        other => out.push_str(&format!("{:?}", other)),
    }
}

pub fn reply_to_text(reply: &Reply) -> String {
    match reply {
        Reply::Value(value) => to_text(value),
        Reply::Nodes(nodes) => nodes
            .iter()
            .map(|(node, value)| match value {
                Some(value) => format!("{}: {}", node, to_text(value)),
                None => format!("{}: (skipped)", node),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

pub fn sizes_to_text(sizes: &BTreeMap<NodeId, i64>) -> String {
    let mut lines: Vec<String> = sizes
        .iter()
        .map(|(node, size)| format!("{:<24} {}", node.to_string(), size))
        .collect();
    lines.push(format!("{:<24} {}", "total", sizes.values().sum::<i64>()));
    lines.join("\n")
}

fn plain(value: &Value) -> String {
    match value {
        Value::BulkString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::SimpleString(text) => text.clone(),
        other => to_text(other),
    }
}
