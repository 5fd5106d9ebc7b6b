/// A suspended caller, pushed on call and popped on return.
/// The callee's registers start at the caller's base plus the fixed
/// frame size; `result` names the caller register the return value
/// lands in.
#[derive(Debug)]
pub struct Frame {
    pub return_ip: usize,
    pub return_rb: usize,
    pub result: u8,
    /// Surplus arguments of an over-saturated generic apply, waiting
    /// for the callee to come back with something callable.
    pub pending: Vec<u32>,
    /// Whether the over-saturated apply was in tail position, so the
    /// re-application reuses this frame's slot instead of resuming at
    /// `return_ip`.
    pub pending_tail: bool,
}

impl Frame {
    pub fn call(return_ip: usize, return_rb: usize, result: u8) -> Frame {
        Frame {
            return_ip,
            return_rb,
            result,
            pending: vec![],
            pending_tail: false,
        }
    }
}
