use serde::{Deserialize, Serialize};

use super::value::Value;
use super::{ClassId, FuncId};

/// Resumable state for one tree node. The marker counts completed
/// sub-steps; `vals` holds their committed results in order; `child`
/// is the single in-progress sub-node. A resumed tick branches on the
/// marker first, so nothing already committed runs again.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Frame {
    pub marker: u32,
    pub vals: Vec<Value>,
    pub child: Option<Box<Frame>>,
    /// Present on call nodes once binding completed.
    pub activation: Option<Box<Activation>>,
    pub result: Value,
}

/// Per-call state: the callee identity, its local slots (parameters
/// first), and the receiver. Survives suspension inside the call's
/// frame, so resumption rebinds nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activation {
    pub func: FuncId,
    pub locals: Vec<Value>,
    pub this: Value,
    /// Class lock this call acquired, released when the call ends.
    pub locked: Option<ClassId>,
}

impl Frame {
    pub fn new() -> Frame {
        Frame::default()
    }

    pub fn child_mut(&mut self) -> &mut Frame {
        self.child.get_or_insert_with(Default::default)
    }

    /// Record a completed sub-step's value and advance the marker.
    pub fn commit(&mut self, value: Value) {
        self.vals.push(value);
        self.child = None;
        self.marker += 1;
    }

    /// Advance past a sub-step that produces no value.
    pub fn advance(&mut self) {
        self.child = None;
        self.marker += 1;
    }

    /// Rewind for another loop iteration; committed values from the
    /// finished iteration are discarded.
    pub fn rewind(&mut self) {
        self.marker = 0;
        self.vals.clear();
        self.child = None;
    }

    pub fn take_result(&mut self) -> Value {
        std::mem::take(&mut self.result)
    }
}
