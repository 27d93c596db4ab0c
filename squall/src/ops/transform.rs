use crate::event::{Event, FieldValue, Metric};
use crate::graph::{Stream, create_stream};

/// Unconditionally set the listed fields on every event.
pub fn with(changes: Vec<(&str, FieldValue)>) -> Stream {
    with_changes(changes, true)
}

/// Set the listed fields only where the event leaves them unset.
pub fn with_ifempty(changes: Vec<(&str, FieldValue)>) -> Stream {
    with_changes(changes, false)
}

fn with_changes(changes: Vec<(&str, FieldValue)>, replace: bool) -> Stream {
    let changes: Vec<(String, FieldValue)> = changes
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();
    create_stream(move |event, out| {
        let mut next = event.clone();
        for (key, value) in &changes {
            value.apply(&mut next, key, replace);
        }
        out.send(next);
    })
}

pub fn default_host(host: &str) -> Stream {
    with_ifempty(vec![("host", host.into())])
}

pub fn default_service(service: &str) -> Stream {
    with_ifempty(vec![("service", service.into())])
}

pub fn default_state(state: &str) -> Stream {
    with_ifempty(vec![("state", state.into())])
}

pub fn default_metric(metric: f64) -> Stream {
    with_ifempty(vec![("metric", metric.into())])
}

pub fn default_ttl(ttl: i64) -> Stream {
    with_ifempty(vec![("ttl", ttl.into())])
}

/// Apply an in-place mutation to a copy of the event and forward it.
pub fn smap(f: impl Fn(&mut Event) + Send + Sync + 'static) -> Stream {
    create_stream(move |event, out| {
        let mut next = event.clone();
        f(&mut next);
        out.send(next);
    })
}

/// Multiply the canonical metric, storing the result as a double.
pub fn scale(factor: f64) -> Stream {
    smap(move |event| {
        event.set_metric(event.metric_d() * factor);
    })
}

pub fn set_state(state: &str) -> Stream {
    let state = state.to_string();
    smap(move |event| {
        event.set_state(state.clone());
    })
}

pub fn set_metric(value: impl Into<Metric>) -> Stream {
    let value = value.into();
    smap(move |event| {
        event.set_metric(value);
    })
}

/// Append tags to every event.
pub fn tag(tags: Vec<&str>) -> Stream {
    let tags: Vec<String> = tags.into_iter().map(str::to_string).collect();
    smap(move |event| {
        for t in &tags {
            event.add_tag(t.clone());
        }
    })
}
