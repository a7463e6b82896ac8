//! Runtime support for JIT-compiled matchers.
//!
//! Compiled code receives a `*mut NativeFrame` and reads the subject pointer
//! and length straight from it. Everything with Rust-side state (explored
//! set, backtrack stack, capture slots) goes through the `extern "C"`
//! helpers below, which the backend registers with `JITBuilder::symbol`.
//!
//! # FFI Functions
//! - `rejit_runtime_visit` - mark `(state, pos)` explored, 0 if it already was
//! - `rejit_runtime_push` - record a resume point
//! - `rejit_runtime_capture` - write a capture slot, recording its old value
//! - `rejit_runtime_pop` - undo to the last resume point and return its id
//! - `rejit_runtime_classify` - `\d \w \s` membership test

use std::mem::offset_of;

use crate::backend::exec::{Backtrack, Visited};
use crate::unicode::{classify, CharType};

/// Return value of a compiled attempt that found no match.
pub const NO_MATCH: i64 = -1;
/// Return value of a compiled attempt that reached a deoptimization exit.
pub const DEOPTIMIZE: i64 = -2;

/// Frame shared between Rust and compiled code.
///
/// This struct is `#[repr(C)]`: compiled code loads `subject`, `len` and
/// `resume_pos` at fixed offsets.
#[repr(C)]
pub struct NativeFrame {
    /// Codepoints of the subject
    pub subject: *const u32,

    /// Subject length in codepoints
    pub len: i64,

    /// Position of the resume point most recently returned by
    /// `rejit_runtime_pop`
    pub resume_pos: i64,

    /// Rust-side matcher state
    pub state: *mut FrameState,
}

pub const SUBJECT_OFFSET: i32 = offset_of!(NativeFrame, subject) as i32;
pub const LEN_OFFSET: i32 = offset_of!(NativeFrame, len) as i32;
pub const RESUME_POS_OFFSET: i32 = offset_of!(NativeFrame, resume_pos) as i32;

/// State that persists across the attempts of one search.
pub struct FrameState {
    pub visited: Visited,
    pub stack: Backtrack<i64>,
    pub captures: Vec<Option<usize>>,
}

impl FrameState {
    pub fn new(states: usize, subject_len: usize, slots: usize) -> Self {
        FrameState {
            visited: Visited::new(states, subject_len),
            stack: Backtrack::new(),
            captures: vec![None; slots],
        }
    }
}

unsafe fn state<'a>(frame: *mut NativeFrame) -> Option<(&'a mut NativeFrame, &'a mut FrameState)> {
    let frame = frame.as_mut()?;
    let state = frame.state.as_mut()?;
    Some((frame, state))
}

// =============================================================================
// Helpers
// =============================================================================

/// # Safety
/// The frame pointer must be valid and point at a live `FrameState`.
#[no_mangle]
pub unsafe extern "C" fn rejit_runtime_visit(frame: *mut NativeFrame, state_id: i64, pos: i64) -> i64 {
    match state(frame) {
        Some((_, st)) => st.visited.insert(state_id as u32, pos as usize) as i64,
        None => 0,
    }
}

/// # Safety
/// The frame pointer must be valid and point at a live `FrameState`.
#[no_mangle]
pub unsafe extern "C" fn rejit_runtime_push(frame: *mut NativeFrame, resume: i64, pos: i64) {
    if let Some((_, st)) = state(frame) {
        st.stack.push_resume(resume, pos as usize);
    }
}

/// # Safety
/// The frame pointer must be valid and point at a live `FrameState`.
#[no_mangle]
pub unsafe extern "C" fn rejit_runtime_capture(frame: *mut NativeFrame, slot: i64, pos: i64) {
    if let Some((_, st)) = state(frame) {
        let slot = slot as usize;
        if let Some(value) = st.captures.get_mut(slot) {
            st.stack.push_restore(slot, *value);
            *value = Some(pos as usize);
        }
    }
}

/// Pops to the most recent resume point, storing its position in
/// `resume_pos`. Returns the resume id, or -1 when the stack is exhausted.
///
/// # Safety
/// The frame pointer must be valid and point at a live `FrameState`.
#[no_mangle]
pub unsafe extern "C" fn rejit_runtime_pop(frame: *mut NativeFrame) -> i64 {
    let Some((frame, st)) = state(frame) else {
        return -1;
    };
    match st.stack.pop(&mut st.captures) {
        Some((resume, pos)) => {
            frame.resume_pos = pos as i64;
            resume
        }
        None => -1,
    }
}

#[no_mangle]
pub extern "C" fn rejit_runtime_classify(cp: i64, class: i64) -> i64 {
    match CharType::from_id(class as u8) {
        Some(class) => classify(cp as u32, class) as i64,
        None => 0,
    }
}
