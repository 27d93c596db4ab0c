use derive_new::new;
use regex::Regex;
use std::sync::Arc;

use crate::event::Event;
use crate::graph::{Operator, Output, Stream};
use crate::ops::{Branch, ClockSlot, Predicate, pred};
use crate::sched::Scheduler;

#[derive(new)]
struct WhereOp {
    predicate: Predicate,
    else_branch: Option<Branch>,
}

impl Operator for WhereOp {
    fn on_event(&self, event: &Event, out: &Output) {
        if (self.predicate)(event) {
            out.send(event.clone());
        } else if let Some(branch) = &self.else_branch {
            branch.push(event);
        }
    }

    fn init(&self, _out: Output, sched: &Arc<dyn Scheduler>) -> anyhow::Result<()> {
        if let Some(branch) = &self.else_branch {
            branch.init(sched)?;
        }
        Ok(())
    }
}

/// Forward events matching the predicate; drop the rest.
pub fn where_(predicate: Predicate) -> Stream {
    Stream::from_op(WhereOp::new(predicate, None))
}

/// Forward matching events; route the rest into the else branch.
pub fn where_else(predicate: Predicate, else_branch: Stream) -> Stream {
    Stream::from_op(WhereOp::new(predicate, Some(Branch::new(else_branch))))
}

#[derive(new)]
struct SplitOp {
    clauses: Vec<(Predicate, Branch)>,
    fallback: Option<Branch>,
}

impl Operator for SplitOp {
    fn on_event(&self, event: &Event, _out: &Output) {
        for (predicate, branch) in &self.clauses {
            if predicate(event) {
                branch.push(event);
                return;
            }
        }
        if let Some(fallback) = &self.fallback {
            fallback.push(event);
        }
    }

    fn init(&self, _out: Output, sched: &Arc<dyn Scheduler>) -> anyhow::Result<()> {
        for (_, branch) in &self.clauses {
            branch.init(sched)?;
        }
        if let Some(fallback) = &self.fallback {
            fallback.init(sched)?;
        }
        Ok(())
    }
}

/// Route each event to the first clause whose predicate matches; drop
/// events that match nothing.
pub fn split(clauses: Vec<(Predicate, Stream)>) -> Stream {
    split_streams(clauses, None)
}

/// Like [split], but events matching no clause go to the fallback.
pub fn split_default(clauses: Vec<(Predicate, Stream)>, fallback: Stream) -> Stream {
    split_streams(clauses, Some(fallback))
}

fn split_streams(clauses: Vec<(Predicate, Stream)>, fallback: Option<Stream>) -> Stream {
    let clauses = clauses
        .into_iter()
        .map(|(predicate, stream)| (predicate, Branch::new(stream)))
        .collect();
    Stream::from_op(SplitOp::new(clauses, fallback.map(Branch::new)))
}

pub fn service(name: &str) -> Stream {
    let name = name.to_string();
    where_(pred(move |e| e.service() == name))
}

pub fn service_any(names: Vec<&str>) -> Stream {
    let names: Vec<String> = names.into_iter().map(str::to_string).collect();
    where_(pred(move |e| names.iter().any(|n| e.service() == *n)))
}

/// LIKE pattern over the service name: `%` matches any run of
/// characters, the rest is matched as a full-string regex.
pub fn service_like(pattern: &str) -> Stream {
    let re = like_regex(pattern);
    where_(pred(move |e| matches_like(&re, e.service())))
}

pub fn service_like_any(patterns: Vec<&str>) -> Stream {
    let regexes: Vec<Option<Regex>> = patterns.iter().map(|p| like_regex(p)).collect();
    where_(pred(move |e| {
        regexes.iter().any(|re| matches_like(re, e.service()))
    }))
}

pub fn state(name: &str) -> Stream {
    let name = name.to_string();
    where_(pred(move |e| e.state() == name))
}

pub fn tagged(tag: &str) -> Stream {
    let tag = tag.to_string();
    where_(pred(move |e| e.has_tag(&tag)))
}

pub fn tagged_any(tags: Vec<&str>) -> Stream {
    let tags: Vec<String> = tags.into_iter().map(str::to_string).collect();
    where_(pred(move |e| tags.iter().any(|t| e.has_tag(t))))
}

pub fn tagged_all(tags: Vec<&str>) -> Stream {
    let tags: Vec<String> = tags.into_iter().map(str::to_string).collect();
    where_(pred(move |e| tags.iter().all(|t| e.has_tag(t))))
}

pub fn above(threshold: f64) -> Stream {
    where_(pred(move |e| e.metric_d() > threshold))
}

pub fn under(threshold: f64) -> Stream {
    where_(pred(move |e| e.metric_d() < threshold))
}

pub fn within(low: f64, high: f64) -> Stream {
    where_(pred(move |e| {
        let m = e.metric_d();
        low <= m && m <= high
    }))
}

pub fn without(low: f64, high: f64) -> Stream {
    where_(pred(move |e| {
        let m = e.metric_d();
        m < low || high < m
    }))
}

fn like_regex(pattern: &str) -> Option<Regex> {
    let source = format!("^(?:{})$", pattern.replace('%', ".*"));
    match Regex::new(&source) {
        Ok(re) => Some(re),
        Err(err) => {
            error!("invalid LIKE pattern {pattern:?}: {err}");
            None
        }
    }
}

fn matches_like(re: &Option<Regex>, value: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(value))
}

#[derive(new)]
struct ExpiredOp {
    #[new(default)]
    clock: ClockSlot,
}

impl Operator for ExpiredOp {
    fn on_event(&self, event: &Event, out: &Output) {
        if event.is_expired(self.clock.now()) {
            out.send(event.clone());
        }
    }

    fn init(&self, _out: Output, sched: &Arc<dyn Scheduler>) -> anyhow::Result<()> {
        self.clock.bind(sched);
        Ok(())
    }
}

/// Forward only events that have expired: state `"expired"`, or engine
/// time past their timestamp plus ttl.
pub fn expired() -> Stream {
    Stream::from_op(ExpiredOp::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{mock_graph, test_sink};
    use crate::sched::Scheduler;

    #[test]
    fn where_forwards_matching_events() {
        let (capture, seen) = test_sink();
        let (g, _) = mock_graph(where_(pred(|e| e.host() == "foo")) >> capture);

        g.push_event(&Event::default());
        assert_eq!(0, seen.lock().unwrap().len());

        let mut e = Event::default();
        e.set_host("foo");
        g.push_event(&e);
        assert_eq!(1, seen.lock().unwrap().len());
    }

    #[test]
    fn where_else_routes_both_paths() {
        let (main, seen_main) = test_sink();
        let (alt, seen_alt) = test_sink();
        let (g, _) = mock_graph(where_else(pred(|e| e.host() == "foo"), alt) >> main);

        let mut e = Event::default();
        e.set_host("foo");
        g.push_event(&e);
        assert_eq!(1, seen_main.lock().unwrap().len());
        assert_eq!(0, seen_alt.lock().unwrap().len());

        e.set_host("bar");
        g.push_event(&e);
        assert_eq!(1, seen_main.lock().unwrap().len());
        assert_eq!(1, seen_alt.lock().unwrap().len());
    }

    #[test]
    fn split_picks_the_first_matching_clause() {
        let (s1, v1) = test_sink();
        let (s2, v2) = test_sink();
        let clauses = vec![
            (pred(|e: &Event| e.host() == "host1"), s1),
            (pred(|e: &Event| e.metric_d() > 3.3), s2),
        ];
        let (g, _) = mock_graph(split(clauses));

        let mut e = Event::default();
        g.push_event(&e);
        e.set_host("host2");
        g.push_event(&e);
        assert_eq!(0, v1.lock().unwrap().len());
        assert_eq!(0, v2.lock().unwrap().len());

        e.set_host("host1");
        g.push_event(&e);
        assert_eq!(1, v1.lock().unwrap().len());

        // first clause wins even when both match
        e.set_metric(3.4);
        g.push_event(&e);
        assert_eq!(2, v1.lock().unwrap().len());
        assert_eq!(0, v2.lock().unwrap().len());

        e.set_host("host2");
        g.push_event(&e);
        assert_eq!(1, v2.lock().unwrap().len());
    }

    #[test]
    fn split_default_catches_the_rest() {
        let (s1, v1) = test_sink();
        let (fallback, v3) = test_sink();
        let clauses = vec![(pred(|e: &Event| e.host() == "host1"), s1)];
        let (g, _) = mock_graph(split_default(clauses, fallback));

        let mut e = Event::default();
        e.set_host("host3");
        g.push_event(&e);
        assert_eq!(0, v1.lock().unwrap().len());
        assert_eq!(1, v3.lock().unwrap().len());
    }

    #[test]
    fn service_matchers() {
        let (capture, seen) = test_sink();
        let (g, _) = mock_graph(service("foo") >> capture);
        let mut e = Event::default();
        g.push_event(&e);
        e.set_service("foo");
        g.push_event(&e);
        assert_eq!(1, seen.lock().unwrap().len());

        let (capture, seen) = test_sink();
        let (g, _) = mock_graph(service_any(vec!["foo", "bar"]) >> capture);
        for name in ["baz", "foo", "bar"] {
            e.set_service(name);
            g.push_event(&e);
        }
        assert_eq!(2, seen.lock().unwrap().len());
    }

    #[test]
    fn service_like_matchers() {
        let (capture, seen) = test_sink();
        let (g, _) = mock_graph(service_like("foo%") >> capture);
        let mut e = Event::default();
        g.push_event(&e);
        e.set_service("foobar");
        g.push_event(&e);
        assert_eq!(1, seen.lock().unwrap().len());
        assert_eq!("foobar", seen.lock().unwrap()[0].service());

        let (capture, seen) = test_sink();
        let (g, _) = mock_graph(service_like_any(vec!["foo%", "bar%"]) >> capture);
        for name in ["baz", "foobar", "bart"] {
            e.set_service(name);
            g.push_event(&e);
        }
        assert_eq!(2, seen.lock().unwrap().len());
    }

    #[test]
    fn invalid_like_pattern_drops_its_subtree() {
        let (capture, seen) = test_sink();
        let (g, _) = mock_graph(service_like("(foo%") >> capture);
        let mut e = Event::default();
        e.set_service("(foobar");
        g.push_event(&e);
        assert_eq!(0, seen.lock().unwrap().len());
    }

    #[test]
    fn tag_matchers() {
        let (any, seen_any) = test_sink();
        let (all, seen_all) = test_sink();
        let (one, seen_one) = test_sink();
        let (g, _) = mock_graph(crate::graph::svec(vec![
            tagged_any(vec!["foo", "bar"]) >> any,
            tagged_all(vec!["foo", "bar", "baz"]) >> all,
            tagged("foo") >> one,
        ]));

        let mut e = Event::default();
        g.push_event(&e);
        e.add_tag("baz");
        g.push_event(&e);
        assert_eq!(0, seen_any.lock().unwrap().len());
        assert_eq!(0, seen_one.lock().unwrap().len());

        e.add_tag("foo");
        g.push_event(&e);
        assert_eq!(1, seen_any.lock().unwrap().len());
        assert_eq!(1, seen_one.lock().unwrap().len());
        assert_eq!(0, seen_all.lock().unwrap().len());

        e.add_tag("bar");
        g.push_event(&e);
        assert_eq!(2, seen_any.lock().unwrap().len());
        assert_eq!(1, seen_all.lock().unwrap().len());
    }

    #[test]
    fn metric_thresholds() {
        let mut e = Event::default();

        let (capture, seen) = test_sink();
        let (g, _) = mock_graph(above(5.0) >> capture);
        e.set_metric(2.0);
        g.push_event(&e);
        e.set_metric(7.0);
        g.push_event(&e);
        assert_eq!(1, seen.lock().unwrap().len());

        let (capture, seen) = test_sink();
        let (g, _) = mock_graph(under(5.0) >> capture);
        e.set_metric(7.0);
        g.push_event(&e);
        e.set_metric(2.0);
        g.push_event(&e);
        assert_eq!(1, seen.lock().unwrap().len());

        let (capture, seen) = test_sink();
        let (g, _) = mock_graph(within(5.0, 8.0) >> capture);
        for m in [2.0, 9.0, 6.0, 5.0, 8.0] {
            e.set_metric(m);
            g.push_event(&e);
        }
        assert_eq!(3, seen.lock().unwrap().len());

        let (capture, seen) = test_sink();
        let (g, _) = mock_graph(without(5.0, 8.0) >> capture);
        for m in [6.0, 2.0, 9.0] {
            e.set_metric(m);
            g.push_event(&e);
        }
        assert_eq!(2, seen.lock().unwrap().len());
    }

    #[test]
    fn state_matches_exactly() {
        let (capture, seen) = test_sink();
        let (g, _) = mock_graph(state("foo") >> capture);
        let mut e = Event::default();
        g.push_event(&e);
        e.set_state("foo");
        g.push_event(&e);
        assert_eq!(1, seen.lock().unwrap().len());
    }

    #[test]
    fn expired_filter_tracks_state_and_clock() {
        let (capture, seen) = test_sink();
        let (g, sched) = mock_graph(expired() >> capture);

        let mut e = Event::default();
        e.set_time(0);
        g.push_event(&e);
        e.set_state("critical");
        g.push_event(&e);
        assert_eq!(0, seen.lock().unwrap().len());

        e.set_state("expired");
        g.push_event(&e);
        assert_eq!(1, seen.lock().unwrap().len());

        e.set_time(5);
        e.clear_state();
        g.push_event(&e);
        assert_eq!(1, seen.lock().unwrap().len());

        sched.set_time(100);
        g.push_event(&e);
        assert_eq!(2, seen.lock().unwrap().len());
    }
}
