//! English inflection and naming helpers.
//!
//! Used to derive collection names from model names, relation field names from target
//! model names, population accessor names, and the humanized labels that are
//! interpolated into validation messages.

use heck::{ToLowerCamelCase, ToSnakeCase};

const UNCOUNTABLE: &[&str] = &[
    "equipment",
    "information",
    "rice",
    "money",
    "species",
    "series",
    "fish",
    "sheep",
    "moose",
    "deer",
    "news",
    "metadata",
];

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("man", "men"),
    ("woman", "women"),
    ("child", "children"),
    ("ox", "oxen"),
    ("foot", "feet"),
    ("tooth", "teeth"),
    ("goose", "geese"),
    ("mouse", "mice"),
];

/// (suffix, replacement) pairs, first match wins.
const PLURAL_RULES: &[(&str, &str)] = &[
    ("quiz", "quizzes"),
    ("matrix", "matrices"),
    ("vertex", "vertices"),
    ("index", "indices"),
    ("alias", "aliases"),
    ("status", "statuses"),
    ("octopus", "octopi"),
    ("virus", "viri"),
    ("axis", "axes"),
    ("testis", "testes"),
    ("bus", "buses"),
    ("sis", "ses"),
    ("tomato", "tomatoes"),
    ("potato", "potatoes"),
    ("echo", "echoes"),
    ("hero", "heroes"),
    ("veto", "vetoes"),
    ("hive", "hives"),
    ("ife", "ives"),
    ("lf", "lves"),
    ("rf", "rves"),
    ("ss", "sses"),
    ("sh", "shes"),
    ("ch", "ches"),
    ("x", "xes"),
    ("s", "s"),
];

const SINGULAR_RULES: &[(&str, &str)] = &[
    ("quizzes", "quiz"),
    ("matrices", "matrix"),
    ("vertices", "vertex"),
    ("indices", "index"),
    ("aliases", "alias"),
    ("statuses", "status"),
    ("octopi", "octopus"),
    ("viri", "virus"),
    ("axes", "axis"),
    ("buses", "bus"),
    ("movies", "movie"),
    ("ies", "y"),
    ("hives", "hive"),
    ("ives", "ife"),
    ("lves", "lf"),
    ("rves", "rf"),
    ("oes", "o"),
    ("sses", "ss"),
    ("shes", "sh"),
    ("ches", "ch"),
    ("xes", "x"),
    ("ses", "sis"),
    ("ss", "ss"),
    ("us", "us"),
    ("is", "is"),
    ("s", ""),
];

fn split_last_word(text: &str) -> (&str, &str) {
    let start = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphabetic())
        .last()
        .map_or(text.len(), |(idx, _)| idx);

    text.split_at(start)
}

fn match_case(original: &str, inflected: String) -> String {
    match original.chars().next() {
        Some(first) if first.is_uppercase() => {
            let mut chars = inflected.chars();
            chars.next().map_or(String::new(), |c| {
                c.to_uppercase().chain(chars).collect()
            })
        }
        _ => inflected,
    }
}

fn inflect_word(word: &str, plural: bool) -> String {
    let lower = word.to_ascii_lowercase();

    if lower.is_empty() || UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }

    for (singular_form, plural_form) in IRREGULAR {
        let (from, to) = if plural {
            (*singular_form, *plural_form)
        } else {
            (*plural_form, *singular_form)
        };
        if lower == from {
            return match_case(word, to.to_string());
        }
        if lower == to {
            return word.to_string();
        }
    }

    // Words are ASCII letters only, so byte offsets in `lower` line up with `word`.
    if plural && let Some(stem) = lower.strip_suffix('y') {
        let consonant = stem.chars().last().is_some_and(|c| !"aeiou".contains(c));
        if consonant || stem.ends_with("qu") {
            return format!("{}ies", &word[..stem.len()]);
        }
    }

    let rules = if plural { PLURAL_RULES } else { SINGULAR_RULES };
    for (suffix, replacement) in rules {
        if lower.ends_with(suffix) {
            return format!("{}{replacement}", &word[..word.len() - suffix.len()]);
        }
    }

    if plural {
        format!("{word}s")
    } else {
        word.to_string()
    }
}

/// Pluralizes the last word of `text`.
pub fn pluralize(text: &str) -> String {
    let (head, word) = split_last_word(text);
    format!("{head}{}", inflect_word(word, true))
}

/// Singularizes the last word of `text`.
pub fn singularize(text: &str) -> String {
    let (head, word) = split_last_word(text);
    format!("{head}{}", inflect_word(word, false))
}

/// Converts camel case to underscores and lowercases, leaving other characters alone.
pub fn underscore(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    let mut prev: Option<char> = None;

    for c in text.chars() {
        if c == '-' {
            out.push('_');
        } else if c.is_uppercase() {
            if prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
        prev = Some(c);
    }

    out
}

/// Turns an underscored identifier into words: drops an `_id` suffix and replaces
/// underscores with spaces. The first letter is capitalized unless `lower_first`.
pub fn humanize(text: &str, lower_first: bool) -> String {
    let lowered = text.to_lowercase();
    let stripped = lowered.strip_suffix("_id").unwrap_or(&lowered);
    let spaced = stripped.replace('_', " ");

    if lower_first {
        return spaced;
    }

    let mut chars = spaced.chars();
    chars.next().map_or(String::new(), |c| {
        c.to_uppercase().chain(chars).collect()
    })
}

/// Derives the label used in validation messages from a property path.
///
/// `"tags.0"` becomes `"tag's element"`, `"address.city"` becomes `"address city"` and
/// `"firstName"` becomes `"first name"`.
pub fn humanize_path(path: &str) -> String {
    let mut label = path.to_string();

    let element = label
        .match_indices(".0")
        .map(|(pos, _)| pos)
        .find(|&pos| matches!(label.as_bytes().get(pos + 2), None | Some(b'.')));
    if let Some(pos) = element {
        label.replace_range(pos..pos + 2, "'s element");
    }
    if let Some(pos) = label.find('.') {
        label.replace_range(pos..pos + 1, " ");
    }

    humanize(&singularize(&underscore(&label)), true)
}

/// Collection bound to a model when no explicit name is configured.
pub fn collection_name(model: &str) -> String {
    pluralize(model).to_lower_camel_case()
}

/// Default relation field for a target model name (`"blog/author"` -> `"author"`).
pub fn field_name(model: &str, many: bool) -> String {
    let mut parts = model.split('/').collect::<Vec<_>>();
    let mut field = parts.pop().unwrap_or_default();

    if field == "index" && !parts.is_empty() {
        field = parts.pop().unwrap_or_default();
    }

    let field = underscore(field).to_lower_camel_case();

    if many { pluralize(&field) } else { field }
}

/// Name of the population accessor installed for a relation field.
pub fn accessor_name(field: &str) -> String {
    format!("populate_{}", field.to_snake_case())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pluralizes_and_singularizes() {
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("person"), "people");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("users"), "users");
        assert_eq!(pluralize("blog-post"), "blog-posts");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("addresses"), "address");
        assert_eq!(singularize("status"), "status");
        assert_eq!(singularize("tags's element"), "tags's element");
    }

    #[test]
    fn derives_collection_names() {
        assert_eq!(collection_name("blog-post"), "blogPosts");
        assert_eq!(collection_name("Category"), "categories");
        assert_eq!(collection_name("user"), "users");
    }

    #[test]
    fn derives_field_and_accessor_names() {
        assert_eq!(field_name("user", false), "user");
        assert_eq!(field_name("blog-post", true), "blogPosts");
        assert_eq!(field_name("admin/group/index", false), "group");
        assert_eq!(accessor_name("blogPosts"), "populate_blog_posts");
    }

    #[test]
    fn humanizes_paths() {
        assert_eq!(humanize_path("firstName"), "first name");
        assert_eq!(humanize_path("tags.0"), "tags's element");
        assert_eq!(humanize_path("address.city"), "address city");
        assert_eq!(humanize_path("owner_id"), "owner");
        assert_eq!(humanize("in_progress", false), "In progress");
    }

    #[test]
    fn element_marker_needs_a_whole_zero_segment() {
        assert!(humanize_path("items.05.tags.0").ends_with("'s element"));
        assert!(humanize_path("items.0.name").contains("'s element"));
        assert!(!humanize_path("scores.01").contains("element"));
    }
}
