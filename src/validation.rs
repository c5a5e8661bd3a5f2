use serde_json::Value;

/// Per-field validation rule. A field missing from the table passes
/// unconditionally.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub required: bool,
    pub max_length: Option<usize>,
    pub kind: Option<FieldKind>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    List,
    Float,
    Int,
}

impl FieldKind {
    fn name(self) -> &'static str {
        match self {
            FieldKind::List => "list",
            FieldKind::Float => "float",
            FieldKind::Int => "int",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            FieldKind::List => value.is_array(),
            FieldKind::Float => value.is_number(),
            FieldKind::Int => value.is_i64() || value.is_u64(),
        }
    }
}

impl FieldRule {
    const fn text(required: bool, max_length: usize) -> Self {
        Self {
            required,
            max_length: Some(max_length),
            kind: None,
            min: None,
            max: None,
        }
    }

    const fn list(required: bool) -> Self {
        Self {
            required,
            max_length: None,
            kind: Some(FieldKind::List),
            min: None,
            max: None,
        }
    }

    const fn float(min: f64, max: f64) -> Self {
        Self {
            required: false,
            max_length: None,
            kind: Some(FieldKind::Float),
            min: Some(min),
            max: Some(max),
        }
    }

    const fn int_min(min: f64) -> Self {
        Self {
            required: false,
            max_length: None,
            kind: Some(FieldKind::Int),
            min: Some(min),
            max: None,
        }
    }
}

/// The fixed rule table the uploader validates every candidate against.
pub const FIELD_RULES: &[(&str, FieldRule)] = &[
    ("name", FieldRule::text(true, 255)),
    ("city", FieldRule::text(true, 100)),
    ("description", FieldRule::text(true, 2000)),
    ("category", FieldRule::text(true, 50)),
    ("subcategory", FieldRule::text(false, 50)),
    ("mood_tags", FieldRule::list(true)),
    ("suggested_visit_time", FieldRule::text(false, 50)),
    ("duration", FieldRule::text(false, 50)),
    ("local_tip", FieldRule::text(false, 500)),
    ("popularity_score", FieldRule::float(0.0, 1.0)),
    ("price_level", FieldRule::text(false, 10)),
    ("rating", FieldRule::float(0.0, 5.0)),
    ("user_ratings_total", FieldRule::int_min(0.0)),
];

/// First violated rule for one field, if any. A JSON `null` counts as absent.
pub fn validate_field(name: &str, rule: &FieldRule, value: Option<&Value>) -> Option<String> {
    let value = value.filter(|v| !v.is_null());

    if rule.required && value.is_none() {
        return Some(format!("{name} is required"));
    }
    let value = value?;

    if let (Some(max_length), Some(text)) = (rule.max_length, value.as_str()) {
        if text.chars().count() > max_length {
            return Some(format!("{name} exceeds maximum length of {max_length}"));
        }
    }

    if let Some(kind) = rule.kind {
        if !kind.matches(value) {
            return Some(format!("{name} must be of type {}", kind.name()));
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(min) = rule.min {
            if number < min {
                return Some(format!("{name} must be at least {min}"));
            }
        }
        if let Some(max) = rule.max {
            if number > max {
                return Some(format!("{name} must be at most {max}"));
            }
        }
    }

    None
}

/// All violations for a record. Empty means uploadable.
pub fn validate_place(place: &Value) -> Vec<String> {
    FIELD_RULES
        .iter()
        .filter_map(|(name, rule)| validate_field(name, rule, place.get(*name)))
        .collect()
}
