//! Helpers for working with BSON values the way the schema layer needs to.
//!
//! Property paths are dotted strings (`"address.city"`, `"tags.0"`); numeric segments
//! index into arrays. A missing path is reported as `None`, which is how the rest of
//! the crate tells an absent ("undefined") value apart from an explicit `Bson::Null`.

use bson::{Bson, Document};

fn child<'a>(value: &'a Bson, segment: &str) -> Option<&'a Bson> {
    match value {
        Bson::Document(doc) => doc.get(segment),
        Bson::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|idx| items.get(idx)),
        _ => None,
    }
}

/// Resolves `path` inside `value`. The empty path addresses `value` itself.
pub fn get_path<'a>(value: &'a Bson, path: &str) -> Option<&'a Bson> {
    if path.is_empty() {
        return Some(value);
    }

    path.split('.')
        .try_fold(value, |current, segment| child(current, segment))
}

/// Resolves a non-empty `path` inside a document.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let first = doc.get(segments.next()?)?;

    segments.try_fold(first, |current, segment| child(current, segment))
}

fn set_in(value: &mut Bson, segments: &[&str], new: Bson) {
    let Some((head, rest)) = segments.split_first() else {
        *value = new;
        return;
    };

    match value {
        Bson::Array(items) => match head.parse::<usize>() {
            Ok(idx) => {
                while items.len() <= idx {
                    items.push(Bson::Null);
                }
                set_in(&mut items[idx], rest, new);
            }
            Err(_) => {
                *value = Bson::Document(Document::new());
                set_in(value, segments, new);
            }
        },
        Bson::Document(doc) => {
            if rest.is_empty() {
                doc.insert(head.to_string(), new);
                return;
            }

            if !matches!(doc.get(*head), Some(Bson::Document(_)) | Some(Bson::Array(_))) {
                doc.insert(head.to_string(), Document::new());
            }
            if let Some(next) = doc.get_mut(*head) {
                set_in(next, rest, new);
            }
        }
        _ => {
            *value = Bson::Document(Document::new());
            set_in(value, segments, new);
        }
    }
}

/// Writes `new` at `path` inside `value`, creating intermediate documents as needed.
/// The empty path replaces `value` entirely.
pub fn set_path(value: &mut Bson, path: &str, new: Bson) {
    if path.is_empty() {
        *value = new;
        return;
    }

    let segments = path.split('.').collect::<Vec<_>>();
    set_in(value, &segments, new);
}

/// Writes `new` at a non-empty `path` inside a document.
pub fn assign(doc: &mut Document, path: &str, new: Bson) {
    let mut value = Bson::Document(std::mem::take(doc));
    set_path(&mut value, path, new);

    if let Bson::Document(updated) = value {
        *doc = updated;
    }
}

/// Removes the value at `path`, returning it if it was present.
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Bson> {
    match path.rsplit_once('.') {
        None => doc.remove(path),
        Some((parent, last)) => {
            let mut current = doc.get_mut(parent.split('.').next()?)?;
            for segment in parent.split('.').skip(1) {
                current = match current {
                    Bson::Document(inner) => inner.get_mut(segment)?,
                    Bson::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
                    _ => return None,
                };
            }

            match current {
                Bson::Document(inner) => inner.remove(last),
                _ => None,
            }
        }
    }
}

/// Loose truthiness: null, `false`, zero, NaN and the empty string are falsy.
pub fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => false,
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0 && !n.is_nan(),
        Bson::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Returns the value as a float if it is one of the numeric BSON kinds.
pub fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Equality that treats all numeric kinds as one number space.
pub fn values_equal(left: &Bson, right: &Bson) -> bool {
    match (as_f64(left), as_f64(right)) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        n.to_string()
    }
}

/// Renders a value as text the way a loosely typed runtime would stringify it.
pub fn to_text(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(n) => format_number(*n),
        Bson::Boolean(b) => b.to_string(),
        Bson::Null => "null".to_string(),
        Bson::Undefined => "undefined".to_string(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::DateTime(dt) => dt
            .try_to_rfc3339_string()
            .unwrap_or_else(|_| dt.timestamp_millis().to_string()),
        Bson::Array(items) => items
            .iter()
            .map(|item| match item {
                Bson::Null | Bson::Undefined => String::new(),
                other => to_text(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Bson::Document(_) => "[object Object]".to_string(),
        other => other.to_string(),
    }
}

fn radix_prefix(text: &str) -> Option<(u32, &str)> {
    let radix = match text.get(..2)? {
        "0x" | "0X" => 16,
        "0o" | "0O" => 8,
        "0b" | "0B" => 2,
        _ => return None,
    };
    Some((radix, &text[2..]))
}

// Signs are not allowed after a radix prefix.
fn parse_radix(digits: &str, radix: u32) -> Option<f64> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    i64::from_str_radix(digits, radix).ok().map(|n| n as f64)
}

/// Coerces a value to a number. Unparsable input becomes `NaN`, never an error.
pub fn to_number(value: &Bson) -> Bson {
    match value {
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => value.clone(),
        Bson::Boolean(b) => Bson::Int32(i32::from(*b)),
        Bson::Null => Bson::Int32(0),
        Bson::DateTime(dt) => Bson::Int64(dt.timestamp_millis()),
        Bson::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Bson::Int32(0);
            }

            let parsed = match trimmed {
                "Infinity" | "+Infinity" => Some(f64::INFINITY),
                "-Infinity" => Some(f64::NEG_INFINITY),
                _ => match radix_prefix(trimmed) {
                    Some((radix, digits)) => parse_radix(digits, radix),
                    None if trimmed.chars().any(|c| c.is_ascii_alphabetic() && !matches!(c, 'e' | 'E')) => None,
                    None => trimmed.parse::<f64>().ok(),
                },
            };

            Bson::Double(parsed.unwrap_or(f64::NAN))
        }
        Bson::Array(items) => match items.as_slice() {
            [] => Bson::Int32(0),
            [single] => to_number(single),
            _ => Bson::Double(f64::NAN),
        },
        _ => Bson::Double(f64::NAN),
    }
}

/// Stable string key for an identifier value, used to index documents by id.
pub fn id_key(value: &Bson) -> String {
    match value {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}
