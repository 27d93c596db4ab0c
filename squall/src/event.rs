use serde::{Deserialize, Serialize};
use std::fmt;

/// Events with no explicit ttl expire this many seconds after their
/// timestamp.
pub const DEFAULT_TTL: i64 = 60;

/// Returned by [Event::str_value] when the field name is unknown.
pub const NIL_VALUE: &str = "__nil__";

/// The metric carried by an [Event].  At most one variant is set;
/// setting a variant clears the others.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Metric {
    #[default]
    None,
    Int(i64),
    Float(f32),
    Double(f64),
}

impl Metric {
    /// Canonical double coercion: integers and single-precision floats
    /// widen, an absent metric reads as 0.0.
    pub fn to_double(self) -> f64 {
        match self {
            Metric::None => 0.0,
            Metric::Int(i) => i as f64,
            Metric::Float(f) => f as f64,
            Metric::Double(d) => d,
        }
    }

    pub fn is_set(self) -> bool {
        self != Metric::None
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::None => Ok(()),
            Metric::Int(i) => write!(f, "{i}"),
            Metric::Float(v) => write!(f, "{v}"),
            Metric::Double(d) => write!(f, "{d}"),
        }
    }
}

impl From<i64> for Metric {
    fn from(v: i64) -> Self {
        Metric::Int(v)
    }
}

impl From<i32> for Metric {
    fn from(v: i32) -> Self {
        Metric::Int(v as i64)
    }
}

impl From<f32> for Metric {
    fn from(v: f32) -> Self {
        Metric::Float(v)
    }
}

impl From<f64> for Metric {
    fn from(v: f64) -> Self {
        Metric::Double(v)
    }
}

/// A telemetry event.  All fields are optional; accessors return the
/// empty string or zero when a field is unset.  Operators treat events
/// as values: they clone before deriving and never mutate their input.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    host: Option<String>,
    service: Option<String>,
    description: Option<String>,
    state: Option<String>,
    time: Option<i64>,
    ttl: Option<i64>,
    tags: Vec<String>,
    attributes: Vec<(String, String)>,
    metric: Metric,
}

macro_rules! string_field {
    ($get:ident, $set:ident, $has:ident, $clear:ident) => {
        pub fn $get(&self) -> &str {
            self.$get.as_deref().unwrap_or("")
        }
        pub fn $set(&mut self, value: impl Into<String>) -> &mut Self {
            self.$get = Some(value.into());
            self
        }
        pub fn $has(&self) -> bool {
            self.$get.is_some()
        }
        pub fn $clear(&mut self) -> &mut Self {
            self.$get = None;
            self
        }
    };
}

macro_rules! int_field {
    ($get:ident, $set:ident, $has:ident) => {
        pub fn $get(&self) -> i64 {
            self.$get.unwrap_or(0)
        }
        pub fn $set(&mut self, value: i64) -> &mut Self {
            self.$get = Some(value);
            self
        }
        pub fn $has(&self) -> bool {
            self.$get.is_some()
        }
    };
}

impl Event {
    string_field!(host, set_host, has_host, clear_host);
    string_field!(service, set_service, has_service, clear_service);
    string_field!(description, set_description, has_description, clear_description);
    string_field!(state, set_state, has_state, clear_state);
    int_field!(time, set_time, has_time);
    int_field!(ttl, set_ttl, has_ttl);

    // metric

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Canonical double value of the metric.
    pub fn metric_d(&self) -> f64 {
        self.metric.to_double()
    }

    pub fn set_metric(&mut self, value: impl Into<Metric>) -> &mut Self {
        self.metric = value.into();
        self
    }

    pub fn clear_metric(&mut self) -> &mut Self {
        self.metric = Metric::None;
        self
    }

    pub fn has_metric(&self) -> bool {
        self.metric.is_set()
    }

    pub fn has_metric_int(&self) -> bool {
        matches!(self.metric, Metric::Int(_))
    }

    pub fn has_metric_float(&self) -> bool {
        matches!(self.metric, Metric::Float(_))
    }

    pub fn has_metric_double(&self) -> bool {
        matches!(self.metric, Metric::Double(_))
    }

    // tags

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.tags.push(tag.into());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    // attributes

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// First occurrence of the key wins.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, key: &str) -> bool {
        self.attr(key).is_some()
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// String view of a named field or attribute.  Unknown names read
    /// as [NIL_VALUE].
    pub fn str_value(&self, key: &str) -> String {
        match key {
            "host" => self.host().to_string(),
            "service" => self.service().to_string(),
            "description" => self.description().to_string(),
            "state" => self.state().to_string(),
            "metric" => self.metric.to_string(),
            "ttl" => self.time_field_string(self.ttl),
            "time" => self.time_field_string(self.time),
            _ => match self.attr(key) {
                Some(value) => value.to_string(),
                None => NIL_VALUE.to_string(),
            },
        }
    }

    fn time_field_string(&self, field: Option<i64>) -> String {
        field.unwrap_or(0).to_string()
    }

    /// Write a string value into a named field.  Unknown names become
    /// attributes.  With `replace` unset, only fields that are currently
    /// empty are written.
    pub fn set_field_str(&mut self, key: &str, value: &str, replace: bool) {
        match key {
            "host" => {
                if replace || !self.has_host() {
                    self.set_host(value);
                }
            }
            "service" => {
                if replace || !self.has_service() {
                    self.set_service(value);
                }
            }
            "description" => {
                if replace || !self.has_description() {
                    self.set_description(value);
                }
            }
            "state" => {
                if replace || !self.has_state() {
                    self.set_state(value);
                }
            }
            _ => {
                if let Some(slot) = self.attributes.iter_mut().find(|(k, _)| k == key) {
                    if replace {
                        slot.1 = value.to_string();
                    }
                } else {
                    self.set_attr(key, value);
                }
            }
        }
    }

    /// Write an integer value into a numeric field.  Unknown names are
    /// logged and discarded.
    pub fn set_field_int(&mut self, key: &str, value: i64, replace: bool) {
        match key {
            "metric" => {
                if replace || !self.has_metric() {
                    self.set_metric(value);
                }
            }
            "ttl" => {
                if replace || !self.has_ttl() {
                    self.set_ttl(value);
                }
            }
            "time" => {
                if replace || !self.has_time() {
                    self.set_time(value);
                }
            }
            _ => {
                error!("integer write to unknown field: {key}");
            }
        }
    }

    /// Write a double value into a numeric field.  Only the metric
    /// accepts doubles; anything else is logged and discarded.
    pub fn set_field_double(&mut self, key: &str, value: f64, replace: bool) {
        match key {
            "metric" => {
                if replace || !self.has_metric() {
                    self.set_metric(value);
                }
            }
            _ => {
                error!("double write to unknown field: {key}");
            }
        }
    }

    /// An event is expired once its state says so, or once `now` has
    /// passed its timestamp plus ttl.
    pub fn is_expired(&self, now: i64) -> bool {
        if self.state() == "expired" {
            return true;
        }
        now > self.time() + self.ttl.unwrap_or(DEFAULT_TTL)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A value to write into an event field; used by `with`-style
/// operators.  The variant picks the write kind, mirroring the metric
/// union.
#[derive(Clone, Debug)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Double(f64),
}

impl FieldValue {
    pub(crate) fn apply(&self, event: &mut Event, key: &str, replace: bool) {
        match self {
            FieldValue::Str(s) => event.set_field_str(key, s, replace),
            FieldValue::Int(i) => event.set_field_int(key, *i, replace),
            FieldValue::Double(d) => event.set_field_double(key, *d, replace),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}
