//! The universal filter grammar of the entity store:
//! `field=value` equality, `field__ne/lt/le/gt/ge` comparisons,
//! `field__match` substring match, plus `sort_by` / `order_by`.
//!
//! Entities that the relational model would filter through a join expose the
//! joined column as a denormalised field; the per-entity alias table maps
//! the public filter name onto the stored field so callers never see the
//! difference.

use mungos::mongodb::{
  bson::{Bson, Document, doc},
  options::FindOptions,
};

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
  #[error("invalid filter operation '{op}' in '{key}'")]
  InvalidOp { key: String, op: String },
  #[error("__match filter on '{key}' requires a string value")]
  MatchNotString { key: String },
  #[error("page_size larger than {max} not allowed")]
  PageSizeTooLarge { max: u64 },
  #[error("order_by must be 'asc' or 'desc', got '{0}'")]
  InvalidOrder(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
  Match,
}

impl FilterOp {
  fn mongo_operator(&self) -> &'static str {
    match self {
      FilterOp::Eq => "$eq",
      FilterOp::Ne => "$ne",
      FilterOp::Lt => "$lt",
      FilterOp::Le => "$lte",
      FilterOp::Gt => "$gt",
      FilterOp::Ge => "$gte",
      FilterOp::Match => "$regex",
    }
  }
}

/// Splits `date_queued__ge` into (`date_queued`, Ge). A key without a
/// recognised suffix is plain equality; an unknown suffix is an error
/// rather than silently matching a field with `__` in its name.
pub fn parse_key(key: &str) -> Result<(&str, FilterOp), FilterError> {
  let Some((field, op)) = key.rsplit_once("__") else {
    return Ok((key, FilterOp::Eq));
  };
  let op = match op {
    "ne" => FilterOp::Ne,
    "lt" => FilterOp::Lt,
    "le" => FilterOp::Le,
    "gt" => FilterOp::Gt,
    "ge" => FilterOp::Ge,
    "match" => FilterOp::Match,
    _ => {
      return Err(FilterError::InvalidOp {
        key: key.to_string(),
        op: op.to_string(),
      });
    }
  };
  Ok((field, op))
}

fn resolve_alias<'a>(
  field: &'a str,
  aliases: &[(&str, &'a str)],
) -> &'a str {
  aliases
    .iter()
    .find(|(public, _)| *public == field)
    .map(|(_, stored)| *stored)
    .unwrap_or(field)
}

/// Compiles filter params into a Mongo filter document. Comparison filters
/// on the same field merge into one subdocument, so
/// `date_queued__ge=a&date_queued__le=b` becomes a range query.
pub fn build_filter(
  params: &[(String, Bson)],
  aliases: &[(&str, &str)],
) -> Result<Document, FilterError> {
  let mut filter = Document::new();
  for (key, value) in params {
    let (field, op) = parse_key(key)?;
    let field = resolve_alias(field, aliases);
    match op {
      FilterOp::Eq => {
        filter.insert(field, value.clone());
      }
      FilterOp::Match => {
        let Bson::String(pattern) = value else {
          return Err(FilterError::MatchNotString {
            key: key.clone(),
          });
        };
        filter.insert(
          field,
          doc! { "$regex": regex_escape(pattern), "$options": "i" },
        );
      }
      op => {
        let operator = op.mongo_operator();
        match filter.get_mut(field) {
          Some(Bson::Document(subdoc)) => {
            subdoc.insert(operator, value.clone());
          }
          // An equality filter on the field was already set; it is
          // stricter than any comparison, keep it.
          Some(_) => {}
          None => {
            filter.insert(field, doc! { operator: value.clone() });
          }
        }
      }
    }
  }
  Ok(filter)
}

/// Builds sort options from `sort_by` / `order_by`.
pub fn sort_options(
  sort_by: Option<&str>,
  order_by: Option<&str>,
  aliases: &[(&str, &str)],
) -> Result<Option<Document>, FilterError> {
  let Some(sort_by) = sort_by else {
    return Ok(None);
  };
  let direction = match order_by.unwrap_or("asc") {
    "asc" => 1,
    "desc" => -1,
    other => return Err(FilterError::InvalidOrder(other.to_string())),
  };
  let field = resolve_alias(sort_by, aliases);
  Ok(Some(doc! { field: direction }))
}

/// FindOptions for one page of results. Pages are 1-based.
pub fn page_options(
  sort: Option<Document>,
  page: u64,
  page_size: u64,
  max_page_size: u64,
) -> Result<FindOptions, FilterError> {
  if page_size > max_page_size {
    return Err(FilterError::PageSizeTooLarge { max: max_page_size });
  }
  let page = page.max(1);
  Ok(
    FindOptions::builder()
      .sort(sort)
      .skip((page - 1) * page_size)
      .limit(page_size as i64)
      .build(),
  )
}

/// `__match` is a substring match, not a user-supplied regex.
fn regex_escape(pattern: &str) -> String {
  let mut escaped = String::with_capacity(pattern.len());
  for c in pattern.chars() {
    if "\\^$.|?*+()[]{}".contains(c) {
      escaped.push('\\');
    }
    escaped.push(c);
  }
  escaped
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plain_key_is_equality() {
    let (field, op) = parse_key("name").unwrap();
    assert_eq!(field, "name");
    assert_eq!(op, FilterOp::Eq);
  }

  #[test]
  fn suffixed_keys_parse() {
    assert_eq!(parse_key("date_queued__ge").unwrap().1, FilterOp::Ge);
    assert_eq!(parse_key("state__ne").unwrap().1, FilterOp::Ne);
    assert_eq!(parse_key("name__match").unwrap().1, FilterOp::Match);
    assert!(parse_key("name__like").is_err());
  }

  #[test]
  fn comparisons_merge_into_range() {
    let filter = build_filter(
      &[
        ("date_queued__ge".to_string(), Bson::Int64(10)),
        ("date_queued__le".to_string(), Bson::Int64(20)),
      ],
      &[],
    )
    .unwrap();
    assert_eq!(
      filter,
      doc! { "date_queued": { "$gte": 10_i64, "$lte": 20_i64 } }
    );
  }

  #[test]
  fn aliases_rewrite_public_names() {
    let filter = build_filter(
      &[("name".to_string(), Bson::String("ext-foo".into()))],
      &[("name", "repo_name")],
    )
    .unwrap();
    assert_eq!(filter, doc! { "repo_name": "ext-foo" });
  }

  #[test]
  fn match_escapes_regex_metacharacters() {
    let filter = build_filter(
      &[("name__match".to_string(), Bson::String("ext.foo".into()))],
      &[],
    )
    .unwrap();
    assert_eq!(
      filter,
      doc! { "name": { "$regex": "ext\\.foo", "$options": "i" } }
    );
  }

  #[test]
  fn page_size_is_bounded() {
    assert!(page_options(None, 1, 200, 100).is_err());
    let options = page_options(None, 3, 10, 100).unwrap();
    assert_eq!(options.skip, Some(20));
    assert_eq!(options.limit, Some(10));
  }

  #[test]
  fn sort_direction() {
    let sort = sort_options(Some("date_queued"), Some("desc"), &[])
      .unwrap()
      .unwrap();
    assert_eq!(sort, doc! { "date_queued": -1 });
    assert!(sort_options(Some("x"), Some("sideways"), &[]).is_err());
  }
}
