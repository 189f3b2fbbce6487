use std::time;

use crate::device::Device;

use super::stats::CoreStats;

#[derive(Clone, Copy)]
#[derive(Debug, PartialEq, Eq)]
pub enum Stage {
    // Traversal launch for a path length, starting at 1
    Trace(u32),
    Shade(u32),
    Shadow,
}

// Brackets GPU work with stream events. Events are only read back after
// the end-of-frame synchronization, so recording never stalls the stream
#[derive(Debug)]
pub struct FrameTimer<D: Device> {
    started: Option<time::Instant>,
    spans: Vec<(Stage, D::Event, D::Event)>,
}

impl<D: Device> Default for FrameTimer<D> {
    fn default() -> Self {
        Self {
            started: None,
            spans: Vec::new(),
        }
    }
}

impl<D: Device> FrameTimer<D> {
    pub fn begin(&mut self) {
        self.started = Some(time::Instant::now());
        self.spans.clear();
    }

    pub fn time<T, F>(&mut self, device: &D, stage: Stage, work: F) -> anyhow::Result<T>
        where F: FnOnce() -> anyhow::Result<T> {

        let start = device.record_event()?;
        let out = work()?;
        let end = device.record_event()?;

        self.spans.push((stage, start, end));

        Ok(out)
    }

    // Must follow a stream synchronization
    pub fn resolve(&mut self, device: &D, stats: &mut CoreStats) -> anyhow::Result<()> {
        let Self { started, spans } = self;

        stats.trace_time0 = 0.;
        stats.trace_time1 = 0.;
        stats.trace_time_x = 0.;
        stats.shade_time = 0.;
        stats.shadow_trace_time = 0.;

        for (stage, start, end) in spans.drain(..) {
            let elapsed = device.elapsed(&start, &end)?;

            match stage {
                Stage::Trace(1) => stats.trace_time0 = elapsed,
                Stage::Trace(2) => stats.trace_time1 = elapsed,
                Stage::Trace(_) => stats.trace_time_x += elapsed,
                Stage::Shade(_) => stats.shade_time += elapsed,
                Stage::Shadow => stats.shadow_trace_time = elapsed,
            }
        }

        stats.render_time = started
            .take()
            .map(|started| started.elapsed().as_secs_f32())
            .unwrap_or(0.);

        Ok(())
    }
}
