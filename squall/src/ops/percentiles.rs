use derive_new::new;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::event::Event;
use crate::graph::{Operator, Output, Stream};
use crate::lock;
use crate::sched::{Scheduler, TaskHandle};

#[derive(new)]
struct PercentilesOp {
    interval: i64,
    quantiles: Vec<f64>,
    #[new(default)]
    state: Arc<Mutex<HashMap<String, ServiceSample>>>,
    #[new(default)]
    handle: Mutex<Option<TaskHandle>>,
}

struct ServiceSample {
    metrics: Vec<f64>,
    template: Event,
}

impl Operator for PercentilesOp {
    fn on_event(&self, event: &Event, _out: &Output) {
        let mut state = lock(&self.state);
        let sample = state
            .entry(event.service().to_string())
            .or_insert_with(|| ServiceSample {
                metrics: Vec::new(),
                template: event.clone(),
            });
        sample.metrics.push(event.metric_d());
        sample.template = event.clone();
    }

    fn init(&self, out: Output, sched: &Arc<dyn Scheduler>) -> anyhow::Result<()> {
        let state = self.state.clone();
        let quantiles = self.quantiles.clone();
        let task = Arc::new(move || {
            let emissions = {
                let mut state = lock(&state);
                let mut emissions = Vec::new();
                for (service, sample) in state.iter_mut() {
                    sample.metrics.sort_by(f64::total_cmp);
                    for &q in &quantiles {
                        let value = pick(&sample.metrics, q);
                        let mut next = sample.template.clone();
                        next.set_service(format!("{service} {q}"));
                        next.set_metric(value);
                        emissions.push(next);
                    }
                    sample.metrics.clear();
                }
                emissions
            };
            for event in emissions {
                out.send(event);
            }
        });
        *lock(&self.handle) = Some(sched.add_periodic_task(task, self.interval)?);
        Ok(())
    }
}

/// Index into the sorted samples so that 0.0 selects the minimum and
/// 1.0 the maximum.  An empty sample reads as zero.
fn pick(sorted: &[f64], quantile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = (quantile * sorted.len() as f64).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Per service, sample each event's metric and on every scheduler tick
/// emit one event per requested quantile, the service name suffixed
/// with the quantile.  A service that stayed quiet over the interval
/// reports zeros.
pub fn percentiles(interval: i64, quantiles: Vec<f64>) -> Stream {
    Stream::from_op(PercentilesOp::new(interval.max(1), quantiles))
}
