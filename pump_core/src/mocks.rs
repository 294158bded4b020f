//! Test and helper doubles for pump_core.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use pump_traits::{FlowSensor, Pump};

/// A sensor that always reports the same flow.
#[derive(Debug, Clone, Copy)]
pub struct ConstantSensor(pub f32);

impl FlowSensor for ConstantSensor {
    fn read_ul_per_min(&mut self) -> f32 {
        self.0
    }
}

/// Replays a fixed sequence, then repeats the last value (0.0 if empty).
#[derive(Debug, Clone, Default)]
pub struct ScriptedSensor {
    script: VecDeque<f32>,
    last: f32,
    reads: usize,
}

impl ScriptedSensor {
    pub fn new(values: impl IntoIterator<Item = f32>) -> Self {
        Self {
            script: values.into_iter().collect(),
            last: 0.0,
            reads: 0,
        }
    }

    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl FlowSensor for ScriptedSensor {
    fn read_ul_per_min(&mut self) -> f32 {
        self.reads += 1;
        if let Some(v) = self.script.pop_front() {
            self.last = v;
        }
        self.last
    }
}

/// Pump that records every commanded speed into a shared log.
#[derive(Debug, Clone, Default)]
pub struct RecordingPump {
    log: Rc<RefCell<Vec<f32>>>,
}

impl RecordingPump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the command log; stays valid after the pump is moved.
    pub fn log(&self) -> Rc<RefCell<Vec<f32>>> {
        Rc::clone(&self.log)
    }
}

impl Pump for RecordingPump {
    fn set_target_sps(&mut self, sps: f32) {
        self.log.borrow_mut().push(sps);
    }
}
