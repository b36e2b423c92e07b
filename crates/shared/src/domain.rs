use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(CommissionId);
id_newtype!(OfferId);
id_newtype!(MessageId);
id_newtype!(FileId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Draft,
    Submitted,
    Waitlist,
    Payment,
    Wip,
    Finished,
}

impl CommissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CommissionStatus::Draft => "draft",
            CommissionStatus::Submitted => "submitted",
            CommissionStatus::Waitlist => "waitlist",
            CommissionStatus::Payment => "payment",
            CommissionStatus::Wip => "wip",
            CommissionStatus::Finished => "finished",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(CommissionStatus::Draft),
            "submitted" => Some(CommissionStatus::Submitted),
            "waitlist" => Some(CommissionStatus::Waitlist),
            "payment" => Some(CommissionStatus::Payment),
            "wip" => Some(CommissionStatus::Wip),
            "finished" => Some(CommissionStatus::Finished),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UsageRights {
    #[default]
    Personal,
    Commercial,
    Content,
}

impl UsageRights {
    pub fn as_str(self) -> &'static str {
        match self {
            UsageRights::Personal => "personal",
            UsageRights::Commercial => "commercial",
            UsageRights::Content => "content",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "personal" => Some(UsageRights::Personal),
            "commercial" => Some(UsageRights::Commercial),
            "content" => Some(UsageRights::Content),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    File,
    StatusUpdate,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
            MessageKind::StatusUpdate => "status_update",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "file" => Some(MessageKind::File),
            "status_update" => Some(MessageKind::StatusUpdate),
            _ => None,
        }
    }
}

/// One category/type/subtype selector of the commission path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PathChoice {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PathChoice {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            price: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Boolean,
    Text,
    List,
}

impl FieldKind {
    pub fn zero_value(self) -> FieldValue {
        match self {
            FieldKind::Boolean => FieldValue::Boolean(false),
            FieldKind::Text => FieldValue::Text(String::new()),
            FieldKind::List => FieldValue::List(Vec::new()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Boolean => "boolean",
            FieldKind::Text => "text",
            FieldKind::List => "list",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "boolean" => Some(FieldKind::Boolean),
            // "input" is the legacy spelling used by the seeded catalog data.
            "text" | "input" => Some(FieldKind::Text),
            "list" => Some(FieldKind::List),
            _ => None,
        }
    }
}

/// The value side of a custom field. The serde tag carries the field kind,
/// so a boolean field can never hold a string and vice versa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Boolean(bool),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Boolean(_) => FieldKind::Boolean,
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::List(_) => FieldKind::List,
        }
    }

    /// Whether the value contributes anything: a checked box, non-empty
    /// text, or at least one non-empty list entry.
    pub fn is_set(&self) -> bool {
        match self {
            FieldValue::Boolean(checked) => *checked,
            FieldValue::Text(text) => !text.trim().is_empty(),
            FieldValue::List(items) => items.iter().any(|item| !item.trim().is_empty()),
        }
    }
}

/// One configurable priced line item on a draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    pub name: String,
    #[serde(flatten)]
    pub value: FieldValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

impl CustomField {
    pub fn price_contribution(&self) -> f64 {
        let unit_price = self.price.unwrap_or(0.0);
        match &self.value {
            FieldValue::Boolean(checked) => {
                if *checked {
                    unit_price
                } else {
                    0.0
                }
            }
            FieldValue::Text(text) => {
                if text.trim().is_empty() {
                    0.0
                } else {
                    unit_price
                }
            }
            FieldValue::List(items) => {
                let filled = items.iter().filter(|item| !item.trim().is_empty()).count();
                unit_price * filled as f64
            }
        }
    }
}

/// Catalog template for a custom field. Instantiating resets the value to
/// the kind's zero value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldTemplate {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

impl FieldTemplate {
    pub fn instantiate(&self) -> CustomField {
        CustomField {
            name: self.name.clone(),
            value: self.kind.zero_value(),
            price: self.price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CharacterPolicy {
    pub max: u32,
    pub price_per_extra: f64,
}

/// An in-progress order under construction by the wizard.
///
/// `total_price` is derived state: recomputed from the other fields after
/// every mutation and never accepted as input from elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CommissionId>,
    /// Catalog offer the path was picked from, when it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<OfferId>,
    pub category: PathChoice,
    pub commission_type: PathChoice,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<PathChoice>,
    pub base_price: f64,
    pub usage_rights: UsageRights,
    pub allow_streaming: bool,
    pub references: Vec<String>,
    pub extra_info: String,
    pub character_count: u32,
    pub extra_character_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_character_count: Option<u32>,
    #[serde(default)]
    pub comm_specific_inputs: Vec<CustomField>,
    #[serde(default)]
    pub addons: Vec<CustomField>,
    pub total_price: f64,
    pub is_submitted: bool,
}

impl Default for CommissionDraft {
    fn default() -> Self {
        Self {
            id: None,
            offer_id: None,
            category: PathChoice::default(),
            commission_type: PathChoice::default(),
            subtype: None,
            base_price: 0.0,
            usage_rights: UsageRights::Personal,
            allow_streaming: true,
            references: Vec::new(),
            extra_info: String::new(),
            character_count: 1,
            extra_character_price: 0.0,
            max_character_count: None,
            comm_specific_inputs: Vec::new(),
            addons: Vec::new(),
            total_price: 0.0,
            is_submitted: false,
        }
    }
}

/// A catalog entry describing one purchasable path combination. Read-only
/// reference data as far as the form engine is concerned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionOffer {
    pub id: OfferId,
    pub category: PathChoice,
    pub commission_type: PathChoice,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<PathChoice>,
    pub base_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_count: Option<CharacterPolicy>,
    #[serde(default)]
    pub comm_specific_inputs: Vec<FieldTemplate>,
    #[serde(default)]
    pub addons: Vec<FieldTemplate>,
}

/// A persisted order. Owned by the backing store; clients hold cached
/// copies whose `status` may be briefly optimistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commission {
    pub id: CommissionId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<OfferId>,
    pub category_name: String,
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype_name: Option<String>,
    pub base_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_price: Option<f64>,
    pub character_count: u32,
    pub extra_character_price: f64,
    pub usage_rights: UsageRights,
    pub allow_streaming: bool,
    #[serde(default)]
    pub comm_specific_inputs: Vec<CustomField>,
    #[serde(default)]
    pub addons: Vec<CustomField>,
    pub reference_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<String>,
    pub status: CommissionStatus,
    pub total_price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waitlisted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_requested_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_received_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_snapshot: Option<CommissionDraft>,
}

/// One chat line attached to a commission. Append-only; displayed oldest
/// to newest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionMessage {
    pub id: MessageId,
    pub commission_id: CommissionId,
    pub user_id: UserId,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub is_admin: bool,
}

impl UserProfile {
    /// Display name when set, username otherwise.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_value_serializes_with_kind_tag() {
        let field = CustomField {
            name: "extra outfits".into(),
            value: FieldValue::List(vec!["casual".into()]),
            price: Some(20.0),
        };
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["kind"], "list");
        assert_eq!(json["value"][0], "casual");

        let back: CustomField = serde_json::from_value(json).unwrap();
        assert_eq!(back, field);
    }

    #[test]
    fn template_instantiation_zeroes_the_value() {
        let template = FieldTemplate {
            name: "shading".into(),
            kind: FieldKind::Boolean,
            price: Some(30.0),
        };
        let field = template.instantiate();
        assert_eq!(field.value, FieldValue::Boolean(false));
        assert_eq!(field.price, Some(30.0));
        assert_eq!(field.price_contribution(), 0.0);
    }

    #[test]
    fn legacy_input_kind_spelling_parses_as_text() {
        assert_eq!(FieldKind::parse("input"), Some(FieldKind::Text));
        assert_eq!(FieldKind::parse("text"), Some(FieldKind::Text));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            CommissionStatus::Draft,
            CommissionStatus::Submitted,
            CommissionStatus::Waitlist,
            CommissionStatus::Payment,
            CommissionStatus::Wip,
            CommissionStatus::Finished,
        ] {
            assert_eq!(CommissionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CommissionStatus::parse("archived"), None);
    }
}
