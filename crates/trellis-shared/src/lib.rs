use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{
  Deserialize,
  Serialize
};

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl FromStr for ItemId {
  type Err = ParseError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    s.trim()
      .parse::<u64>()
      .map(ItemId)
      .map_err(|_| {
        ParseError::new("item id", s)
      })
  }
}

/// Lifecycle status of a tracked item.
///
/// The wire codes are the ones the
/// project backend stores.
#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
)]
pub enum Status {
  #[serde(rename = "planification")]
  Planning,
  #[serde(rename = "en_attente")]
  Pending,
  #[serde(rename = "en_cours")]
  Active,
  #[serde(rename = "en_retard")]
  Overdue,
  #[serde(rename = "termine")]
  Done,
  #[serde(rename = "annule")]
  Cancelled
}

impl Status {
  pub const ALL: [Status; 6] = [
    Status::Planning,
    Status::Pending,
    Status::Active,
    Status::Overdue,
    Status::Done,
    Status::Cancelled
  ];

  pub fn code(self) -> &'static str {
    match self {
      | Status::Planning => {
        "planification"
      }
      | Status::Pending => "en_attente",
      | Status::Active => "en_cours",
      | Status::Overdue => "en_retard",
      | Status::Done => "termine",
      | Status::Cancelled => "annule"
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      | Status::Planning => "Planning",
      | Status::Pending => "Pending",
      | Status::Active => "Active",
      | Status::Overdue => "Overdue",
      | Status::Done => "Done",
      | Status::Cancelled => "Cancelled"
    }
  }
}

impl fmt::Display for Status {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.label())
  }
}

impl FromStr for Status {
  type Err = ParseError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let needle = s.trim();
    Status::ALL
      .into_iter()
      .find(|status| {
        needle.eq_ignore_ascii_case(
          status.code()
        ) || needle
          .eq_ignore_ascii_case(
            status.label()
          )
      })
      .ok_or_else(|| {
        ParseError::new("status", s)
      })
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Hash,
  Default,
)]
pub enum Priority {
  #[serde(rename = "faible")]
  Low,
  #[default]
  #[serde(rename = "moyen")]
  Medium,
  #[serde(rename = "eleve")]
  High,
  #[serde(rename = "critique")]
  Critical
}

impl Priority {
  pub const ALL: [Priority; 4] = [
    Priority::Low,
    Priority::Medium,
    Priority::High,
    Priority::Critical
  ];

  pub fn code(self) -> &'static str {
    match self {
      | Priority::Low => "faible",
      | Priority::Medium => "moyen",
      | Priority::High => "eleve",
      | Priority::Critical => "critique"
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      | Priority::Low => "Low",
      | Priority::Medium => "Medium",
      | Priority::High => "High",
      | Priority::Critical => "Critical"
    }
  }
}

impl fmt::Display for Priority {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.label())
  }
}

impl FromStr for Priority {
  type Err = ParseError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let needle = s.trim();
    Priority::ALL
      .into_iter()
      .find(|priority| {
        needle.eq_ignore_ascii_case(
          priority.code()
        ) || needle
          .eq_ignore_ascii_case(
            priority.label()
          )
      })
      .ok_or_else(|| {
        ParseError::new("priority", s)
      })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
  pub kind:  &'static str,
  pub input: String
}

impl ParseError {
  fn new(
    kind: &'static str,
    input: &str
  ) -> Self {
    Self {
      kind,
      input: input.to_string()
    }
  }
}

impl fmt::Display for ParseError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    write!(
      f,
      "unknown {}: {:?}",
      self.kind, self.input
    )
  }
}

impl std::error::Error for ParseError {}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
)]
pub struct Item {
  pub id:       ItemId,
  #[serde(default)]
  pub name:     String,
  pub status:   Status,
  #[serde(default)]
  pub priority: Priority,
  #[serde(default)]
  pub progress: u8,
  #[serde(default)]
  pub category: Option<String>,
  #[serde(default)]
  pub deadline: Option<String>,

  /// Display fields the board never
  /// interprets.
  #[serde(flatten)]
  pub extra:
    BTreeMap<String, serde_json::Value>
}

impl Item {
  pub fn new(
    id: ItemId,
    name: impl Into<String>,
    status: Status
  ) -> Self {
    Self {
      id,
      name: name.into(),
      status,
      priority: Priority::default(),
      progress: 0,
      category: None,
      deadline: None,
      extra: BTreeMap::new()
    }
  }
}

/// One page of a listing plus the
/// server-side total for the query.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Default,
)]
pub struct ItemPage {
  pub items:       Vec<Item>,
  pub total_count: u64
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
)]
pub struct ItemCreate {
  pub name:        String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub priority:    Priority,
  #[serde(default)]
  pub category:    Option<String>,
  #[serde(default)]
  pub deadline:    Option<String>
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Default,
)]
pub struct BoardFilter {
  #[serde(default)]
  pub search:   Option<String>,
  #[serde(default)]
  pub priority: Option<Priority>,
  #[serde(default)]
  pub category: Option<String>
}

impl BoardFilter {
  pub fn is_empty(&self) -> bool {
    self
      .search
      .as_deref()
      .is_none_or(|s| s.trim().is_empty())
      && self.priority.is_none()
      && self.category.is_none()
  }

  pub fn matches(
    &self,
    item: &Item
  ) -> bool {
    if let Some(priority) = self.priority
      && item.priority != priority
    {
      return false;
    }

    if let Some(category) =
      self.category.as_deref()
      && !item
        .category
        .as_deref()
        .is_some_and(|c| {
          c.eq_ignore_ascii_case(
            category
          )
        })
    {
      return false;
    }

    if let Some(search) =
      self.search.as_deref()
    {
      let needle =
        search.trim().to_lowercase();
      if !needle.is_empty()
        && !item
          .name
          .to_lowercase()
          .contains(&needle)
      {
        return false;
      }
    }

    true
  }
}
