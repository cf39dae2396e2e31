//! Blendable floats.
//!
//! Most preset knobs interpolate from the outgoing preset's value to the
//! incoming one over the crossfade window, and expression code reads the
//! interpolated value. A `Blendable` stores the target value plus the
//! interpolation metadata; reads are by timestamp so the orchestrator's clock
//! is the single source of truth.

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Blendable {
    to: f64,
    from: f64,
    start: f64,
    end: f64,
    blending: bool,
}

impl Blendable {
    pub fn new(value: f64) -> Self {
        Self {
            to: value,
            from: value,
            start: 0.0,
            end: 0.0,
            blending: false,
        }
    }

    /// The target (un-blended) value; what export writes.
    pub fn target(&self) -> f64 {
        self.to
    }

    /// Sets the value directly, cancelling any blend in flight. Used by
    /// import and by external edits through the variable bindings.
    pub fn set(&mut self, value: f64) {
        self.to = value;
        self.from = value;
        self.blending = false;
    }

    /// Captures `from` as the interpolation start point for a blend running
    /// over `[now, now + duration]`.
    pub fn start_blend(&mut self, from: f64, now: f64, duration: f64) {
        if duration <= 0.0 {
            self.blending = false;
            return;
        }
        self.from = from;
        self.start = now;
        self.end = now + duration;
        self.blending = true;
    }

    /// Value as seen by expression code at `time`.
    pub fn value_at(&self, time: f64) -> f64 {
        if !self.blending {
            return self.to;
        }
        let span = self.end - self.start;
        if span <= 0.0 {
            return self.to;
        }
        let t = ((time - self.start) / span).clamp(0.0, 1.0);
        self.from + (self.to - self.from) * t
    }

    pub fn is_blending(&self) -> bool {
        self.blending
    }

    /// Drops the interpolation state once the window has passed.
    pub fn finish_if_done(&mut self, time: f64) {
        if self.blending && time >= self.end {
            self.blending = false;
        }
    }
}

impl Default for Blendable {
    fn default() -> Self {
        Self::new(0.0)
    }
}
