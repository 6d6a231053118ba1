//! Compiled filter and validation rules, and the pipeline that runs them.
//!
//! Filters and validations share one shape, [`Rule`]: a property path, the humanized
//! label used in messages, and the method. Filters run in order and rewrite values in
//! place. Validations run concurrently and never short-circuit: every rule is settled,
//! and every error it produced (returned or raised) ends up in the result list.

use std::{fmt, future::Future, sync::Arc};

use bson::Bson;
use chrono::{DateTime, NaiveDate, Utc};
use futures::{
    FutureExt,
    future::{BoxFuture, join_all},
};

use crate::{
    error::ValidationError,
    value::{get_path, set_path, to_text, values_equal},
};

/// A filter maps a present value to its normalized form. `None` leaves it untouched.
pub type FilterFn = Arc<dyn Fn(&Bson) -> Option<Bson> + Send + Sync>;

/// What a validator settles to. `Ok` carries the (possibly empty) list of failures;
/// `Err` is a failure raised instead of returned. Both are collected the same way.
pub type ValidationOutcome = Result<Vec<ValidationError>, ValidationError>;

/// A validator receives the value at its path, or `None` if the path is absent.
pub type ValidatorFn = Arc<dyn Fn(Option<Bson>) -> BoxFuture<'static, ValidationOutcome> + Send + Sync>;

/// Renders an enumeration member for error messages.
pub type Translate = Arc<dyn Fn(&Bson) -> String + Send + Sync>;

/// A compiled rule bound to a property path.
#[derive(Clone)]
pub struct Rule<M> {
    pub path: String,
    pub humanized: String,
    pub method: M,
}

pub type FilterRule = Rule<FilterFn>;
pub type ValidationRule = Rule<ValidatorFn>;

impl<M> Rule<M> {
    pub fn new(path: impl Into<String>, humanized: impl Into<String>, method: M) -> Self {
        Self {
            path: path.into(),
            humanized: humanized.into(),
            method,
        }
    }
}

impl<M> fmt::Debug for Rule<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("path", &self.path)
            .field("humanized", &self.humanized)
            .finish_non_exhaustive()
    }
}

/// Wraps a closure as a [`FilterFn`].
pub fn filter_fn<F>(f: F) -> FilterFn
where
    F: Fn(&Bson) -> Option<Bson> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps a synchronous check as a [`ValidatorFn`].
pub fn validator<F>(f: F) -> ValidatorFn
where
    F: Fn(Option<&Bson>) -> Option<ValidationError> + Send + Sync + 'static,
{
    Arc::new(move |value| {
        let outcome = f(value.as_ref());
        async move { Ok(outcome.into_iter().collect()) }.boxed()
    })
}

/// Wraps an asynchronous check as a [`ValidatorFn`].
pub fn async_validator<F, Fut>(f: F) -> ValidatorFn
where
    F: Fn(Option<Bson>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ValidationOutcome> + Send + 'static,
{
    Arc::new(move |value| f(value).boxed())
}

fn present(value: Option<&Bson>) -> Option<&Bson> {
    value.filter(|v| !matches!(v, Bson::Undefined))
}

/// Fails when the value is absent or null.
pub fn required() -> ValidatorFn {
    validator(|value| match present(value) {
        None | Some(Bson::Null) => Some(ValidationError::new("{field} is required.")),
        Some(_) => None,
    })
}

/// Fails when a present value is not one of `allowed`.
pub fn one_of(allowed: Vec<Bson>, translate: Option<Translate>) -> ValidatorFn {
    validator(move |value| {
        let value = present(value)?;
        if allowed.iter().any(|candidate| values_equal(candidate, value)) {
            return None;
        }

        let rendered = allowed
            .iter()
            .map(|member| match &translate {
                Some(translate) => translate(member),
                None => to_text(member),
            })
            .collect::<Vec<_>>()
            .join("`, `");

        Some(ValidationError::new(format!(
            "{{field}} must be one of those values: `{rendered}` (without the quotes)."
        )))
    })
}

/// Runs `rules` in order over `value`.
///
/// A rule is skipped when its path is absent or its filter declines. A rule on the
/// root path replaces `value` only when `allow_root` is set, which is the case for
/// array elements but not for whole documents.
pub fn apply_filtering(mut value: Bson, rules: &[FilterRule], allow_root: bool) -> Bson {
    for rule in rules {
        let Some(current) = present(get_path(&value, &rule.path)) else {
            continue;
        };
        let Some(next) = (rule.method)(current) else {
            continue;
        };

        if !rule.path.is_empty() {
            set_path(&mut value, &rule.path, next);
        } else if allow_root {
            value = next;
        }
    }

    value
}

/// Settles every rule in `rules` against `value` and collects all failures, each
/// attributed to its rule's path with `{field}` replaced by the rule's label.
pub fn apply_validation(value: &Bson, rules: &[ValidationRule]) -> BoxFuture<'static, Vec<ValidationError>> {
    let pending = rules
        .iter()
        .map(|rule| {
            let input = present(get_path(value, &rule.path)).cloned();
            let outcome = (rule.method)(input);
            let path = rule.path.clone();
            let humanized = rule.humanized.clone();

            async move {
                let errors = match outcome.await {
                    Ok(errors) => errors,
                    Err(error) => vec![error],
                };

                errors
                    .into_iter()
                    .map(|error| error.attribute(&path, &humanized))
                    .collect::<Vec<_>>()
            }
        })
        .collect::<Vec<_>>();

    async move {
        join_all(pending)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
    .boxed()
}

/// Applies element filters to every element of an array value in place.
pub(crate) fn array_filter(rules: Arc<[FilterRule]>) -> FilterFn {
    Arc::new(move |value| match value {
        Bson::Array(items) => Some(Bson::Array(
            items
                .iter()
                .map(|item| match item {
                    Bson::Undefined => item.clone(),
                    _ => apply_filtering(item.clone(), &rules, true),
                })
                .collect(),
        )),
        _ => None,
    })
}

/// Validates every element of an array value and merges all element failures.
pub(crate) fn array_validator(rules: Arc<[ValidationRule]>) -> ValidatorFn {
    Arc::new(move |value| {
        let pending = match &value {
            Some(Bson::Array(items)) => items
                .iter()
                .map(|item| apply_validation(item, &rules))
                .collect::<Vec<_>>(),
            _ => Vec::new(),
        };

        async move {
            Ok(join_all(pending)
                .await
                .into_iter()
                .flatten()
                .collect())
        }
        .boxed()
    })
}

fn parse_date(value: &Bson) -> Option<Bson> {
    match value {
        Bson::String(text) => {
            let text = text.trim();
            let parsed = DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(text, "%Y-%m-%d")
                        .ok()
                        .and_then(|date| date.and_hms_opt(0, 0, 0))
                        .map(|dt| dt.and_utc())
                })?;

            Some(Bson::DateTime(bson::DateTime::from_chrono(parsed)))
        }
        Bson::Int64(millis) => Some(Bson::DateTime(bson::DateTime::from_millis(*millis))),
        Bson::Int32(millis) => Some(Bson::DateTime(bson::DateTime::from_millis(i64::from(*millis)))),
        _ => None,
    }
}

/// Looks up a filter in the shared named-filter registry.
pub fn named_filter(name: &str) -> Option<FilterFn> {
    let filter: FilterFn = match name {
        "trim" => filter_fn(|value| match value {
            Bson::String(s) => Some(Bson::String(s.trim().to_string())),
            _ => None,
        }),
        "lowercase" => filter_fn(|value| match value {
            Bson::String(s) => Some(Bson::String(s.to_lowercase())),
            _ => None,
        }),
        "uppercase" => filter_fn(|value| match value {
            Bson::String(s) => Some(Bson::String(s.to_uppercase())),
            _ => None,
        }),
        "date" => filter_fn(parse_date),
        _ => return None,
    };

    Some(filter)
}

/// Looks up a validator in the shared named-validation registry.
pub fn named_validator(name: &str) -> Option<ValidatorFn> {
    let check: ValidatorFn = match name {
        "required" => required(),
        "notEmpty" => validator(|value| {
            let empty = match present(value)? {
                Bson::String(s) => s.trim().is_empty(),
                Bson::Array(items) => items.is_empty(),
                Bson::Document(doc) => doc.is_empty(),
                _ => false,
            };
            empty.then(|| ValidationError::new("{field} must not be empty."))
        }),
        "date" => validator(|value| match present(value)? {
            Bson::DateTime(_) => None,
            _ => Some(ValidationError::new("{field} is not a valid date.")),
        }),
        _ => return None,
    };

    Some(check)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn rule<M>(path: &str, method: M) -> Rule<M> {
        Rule::new(path, path, method)
    }

    #[test]
    fn filtering_skips_absent_paths_and_protects_the_root() {
        let upper = named_filter("uppercase").expect("uppercase filter");
        let rules = vec![
            rule("name", upper.clone()),
            rule("missing", upper.clone()),
            rule("", filter_fn(|_| Some(Bson::Null))),
        ];

        let out = apply_filtering(Bson::Document(doc! { "name": "ada" }), &rules, false);
        assert_eq!(out, Bson::Document(doc! { "name": "ADA" }));

        let root = vec![rule("", upper)];
        assert_eq!(
            apply_filtering(Bson::String("x".into()), &root, true),
            Bson::String("X".into())
        );
    }

    #[tokio::test]
    async fn validation_settles_every_rule() {
        let failing = async_validator(|_| async { Err(ValidationError::new("{field} exploded.")) });
        let rules = vec![
            Rule::new("title", "title", required()),
            Rule::new("title", "title", failing),
            Rule::new("body", "body", required()),
        ];

        let errors = apply_validation(&Bson::Document(doc! { "body": "text" }), &rules).await;
        let messages = errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>();

        assert_eq!(messages, vec!["title is required.", "title exploded."]);
        assert!(errors.iter().all(|e| e.path == "title"));
    }

    #[tokio::test]
    async fn enum_messages_use_translated_labels() {
        let translate: Translate = Arc::new(|value| to_text(value).to_uppercase());
        let rules = vec![Rule::new(
            "status",
            "status",
            one_of(vec!["draft".into(), "live".into()], Some(translate)),
        )];

        let ok = apply_validation(&Bson::Document(doc! { "status": "live" }), &rules).await;
        assert!(ok.is_empty());

        let absent = apply_validation(&Bson::Document(doc! {}), &rules).await;
        assert!(absent.is_empty());

        let bad = apply_validation(&Bson::Document(doc! { "status": "gone" }), &rules).await;
        assert_eq!(
            bad[0].message,
            "status must be one of those values: `DRAFT`, `LIVE` (without the quotes)."
        );
    }

    #[tokio::test]
    async fn array_validation_merges_element_errors() {
        let element_rules: Arc<[ValidationRule]> = vec![Rule::new("", "tag's element", required())].into();
        let rules = vec![Rule::new("tags", "tag", array_validator(element_rules))];

        let errors = apply_validation(
            &Bson::Document(doc! { "tags": ["ok", Bson::Null] }),
            &rules,
        )
        .await;

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "tags");
        assert_eq!(errors[0].message, "tag's element is required.");
    }

    #[test]
    fn date_filter_parses_calendar_dates() {
        let date = named_filter("date").expect("date filter");
        let parsed = date(&Bson::String("2024-03-01".into()));
        assert!(matches!(parsed, Some(Bson::DateTime(dt)) if dt.timestamp_millis() == 1_709_251_200_000));
        assert!(date(&Bson::String("soon".into())).is_none());
        assert!(named_validator("nope").is_none());
    }
}
