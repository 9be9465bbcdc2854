// RANKLE, an interpreter for a terse array language.

// SPDX-FileCopyrightText: © 2026 The Rankle contributors
// SPDX-License-Identifier: AGPL-3.0-only

// Rankle is licensed under the terms of the GNU Affero General Public
// License version 3. See the top level LICENSE file for the license
// text.

// <>

// src/lib.rs

// Top level lib: declares modules, owns the interpreter context, and
// offers the compile-and-evaluate entry points the REPL drives. All
// interpreter state lives in the context; there are no statics.

// <>

use std::time::Instant;

use thiserror::Error;

pub mod core;
pub mod eval;
pub mod kernels;
pub mod memmgt;
pub mod parser;
pub mod print;
pub mod verbs;
pub mod workers;

use crate::core::{Val, NONE};
use crate::kernels::rand::Prng;
use crate::memmgt::Heap;
use crate::workers::WorkerPool;

/// Scopes a..z plus the top level
pub const SCOPE_COUNT: usize = 27;
pub const TOP_SCOPE: usize = 26;

/// Workspace slots per scope: variables a..z, then the literal pool
pub const SLOT_COUNT: usize = 32;
pub const SLOT_VARS: usize = 26;
pub const LIT0: usize = 26;

/// Implicit right and left argument slots of a user function
pub const SLOT_X: usize = (b'x' - b'a') as usize;
pub const SLOT_Y: usize = (b'y' - b'a') as usize;

/// Byte-stream size cap per scope
pub const BODY_MAX: usize = 256;

// Byte-stream encoding: slot loads below 32, verb codes from 32,
// then assignment, grouping, statement separator, and constant
// references from 96
pub const B_VERB0: u8 = 32;
pub const B_ASSIGN: u8 = 90;
pub const B_OPEN: u8 = 91;
pub const B_CLOSE: u8 = 92;
pub const B_SEP: u8 = 93;
pub const B_CONST0: u8 = 96;

/// Internal error sentinels; each prints as a four-byte token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrCode {
    Nyi,
    Rank,
    Length,
    Type,
    Domain,
    Index,
    Memory,
    Refcount,
    Parse,
    InUse,
}

impl ErrCode {
    pub fn token(self) -> &'static str {
        match self {
            ErrCode::Nyi => " nyi",
            ErrCode::Rank => " rnk",
            ErrCode::Length => " len",
            ErrCode::Type => " typ",
            ErrCode::Domain => " dom",
            ErrCode::Index => " idx",
            ErrCode::Memory => " wsf",
            ErrCode::Refcount => " rcf",
            ErrCode::Parse => " prs",
            ErrCode::InUse => " use",
        }
    }

    /// Out-of-memory and refcount overflow terminate the process
    pub fn fatal(self) -> bool {
        matches!(self, ErrCode::Memory | ErrCode::Refcount)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// An evaluation error, shown as the failing verb's glyph and
    /// the four-byte error token
    #[error("{glyph}{}", .code.token())]
    Eval { glyph: char, code: ErrCode },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn fatal(&self) -> bool {
        matches!(self, Error::Eval { code, .. } if code.fatal())
    }
}

/// One named storage area: variable slots, the compiled body, and a
/// counter guarding against redefinition while on the call stack
pub struct Scope {
    pub slots: [Val; SLOT_COUNT],
    pub body: [u8; BODY_MAX],
    pub body_len: u16,
    pub active: u16,
}

impl Scope {
    fn new() -> Self {
        Self {
            slots: [NONE; SLOT_COUNT],
            body: [0; BODY_MAX],
            body_len: 0,
            active: 0,
        }
    }
}

/// The interpreter context: handle table and pools, scopes, the
/// worker pool, and the PRNG state
pub struct Ctx {
    pub heap: Heap,
    pub scopes: Vec<Scope>,
    pub pool: WorkerPool,
    pub rng: Option<Prng>,
    nop_ns: f64,
}

impl Ctx {
    /// Builds a context with `workers` kernel ways (1 = no worker
    /// threads); timing is calibrated here, once
    pub fn new(workers: usize) -> Self {
        Self {
            heap: Heap::new(),
            scopes: (0..SCOPE_COUNT).map(|_| Scope::new()).collect(),
            pool: WorkerPool::start(workers),
            rng: None,
            nop_ns: calibrate(),
        }
    }

    /// Compiles and evaluates one input line. Returns the rendered
    /// result, or None when the line was quiet (an assignment or
    /// pure definition).
    pub fn line(&mut self, src: &str) -> Result<Option<String>, Error> {
        parser::compile_line(self, src).map_err(|code| Error::Eval { glyph: ' ', code })?;
        match eval::run_scope(self, TOP_SCOPE) {
            Ok(None) => Ok(None),
            Ok(Some((v, quiet))) => {
                let out = if quiet {
                    None
                } else {
                    Some(print::render(self, v))
                };
                self.heap.release(v);
                Ok(out)
            }
            Err(e) => Err(Error::Eval {
                glyph: e.glyph as char,
                code: e.code,
            }),
        }
    }

    /// Times `iters` evaluations of an expression, reporting
    /// nanoseconds per iteration net of calibrated loop overhead
    pub fn time(&mut self, iters: u32, expr: &str) -> Result<u128, Error> {
        let iters = iters.max(1);
        parser::compile_line(self, expr).map_err(|code| Error::Eval { glyph: ' ', code })?;
        let start = Instant::now();
        for _ in 0..iters {
            match eval::run_scope(self, TOP_SCOPE) {
                Ok(Some((v, _))) => self.heap.release(v),
                Ok(None) => (),
                Err(e) => {
                    return Err(Error::Eval {
                        glyph: e.glyph as char,
                        code: e.code,
                    })
                }
            }
        }
        let per = start.elapsed().as_nanos() as f64 / iters as f64 - self.nop_ns;
        Ok(per.max(0.0) as u128)
    }

    /// Bytes held by live arrays
    pub fn workspace_bytes(&self) -> usize {
        self.heap.live_bytes()
    }

    /// Letters of the top scope's bound variables
    pub fn defined_vars(&self) -> String {
        let mut out = String::new();
        for (i, &v) in self.scopes[TOP_SCOPE].slots[..SLOT_VARS].iter().enumerate() {
            if v != NONE {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push((b'a' + i as u8) as char);
            }
        }
        out
    }

    /// The verb table for `\?`
    pub fn verb_help(&self) -> String {
        let mut out = String::new();
        for &(glyph, monad, dyad) in verbs::VERBS.iter() {
            out.push_str(&format!("{:3} {:12} {}\n", glyph, monad, dyad));
        }
        out
    }

    /// Releases every scope binding and compiled body
    pub fn teardown(&mut self) {
        for s in 0..SCOPE_COUNT {
            for slot in 0..SLOT_COUNT {
                let v = std::mem::replace(&mut self.scopes[s].slots[slot], NONE);
                self.heap.release(v);
            }
            self.scopes[s].body_len = 0;
        }
    }
}

/// Measures the cost of a 200,000-iteration no-op loop, once at
/// startup, for the `\t` baseline
fn calibrate() -> f64 {
    let start = Instant::now();
    for i in 0..200_000u64 {
        std::hint::black_box(i);
    }
    start.elapsed().as_nanos() as f64 / 200_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(ctx: &mut Ctx, src: &str) -> String {
        ctx.line(src).unwrap().expect("expected printed output")
    }

    #[test]
    fn scenario_sum_over_enum() {
        let mut c = Ctx::new(1);
        assert_eq!(one(&mut c, "+/!10"), "45");
    }

    #[test]
    fn scenario_right_to_left() {
        let mut c = Ctx::new(1);
        assert_eq!(one(&mut c, "2*3+4"), "14");
    }

    #[test]
    fn scenario_assign_then_add() {
        let mut c = Ctx::new(1);
        assert_eq!(one(&mut c, "x:1 2 3; x+x"), "2 4 6");
    }

    #[test]
    fn scenario_string_concat() {
        let mut c = Ctx::new(1);
        assert_eq!(one(&mut c, "\"abc\",\"de\""), "abcde");
    }

    #[test]
    fn scenario_user_function() {
        let mut c = Ctx::new(1);
        assert_eq!(one(&mut c, "a::{x+1}; a 4"), "5");
    }

    #[test]
    fn scenario_timing() {
        let mut c = Ctx::new(1);
        // any nonnegative integer is acceptable
        c.time(100, "+/!1000").unwrap();
    }

    #[test]
    fn quiet_lines_print_nothing() {
        let mut c = Ctx::new(1);
        assert_eq!(c.line("x:5").unwrap(), None);
        assert_eq!(c.line("a::{x*x}").unwrap(), None);
        assert_eq!(one(&mut c, "a x"), "25");
    }

    #[test]
    fn error_display_forms() {
        let mut c = Ctx::new(1);
        let e = c.line("1 2+1 2 3").unwrap_err();
        assert_eq!(e.to_string(), "+ len");
        let e = c.line("`a*2").unwrap_err();
        assert_eq!(e.to_string(), "* typ");
        let e = c.line(")").unwrap_err();
        assert_eq!(e.to_string(), "  prs");
        let e = c.line("1 2 3@5").unwrap_err();
        assert_eq!(e.to_string(), "@ idx");
        let e = c.line("!-1").unwrap_err();
        assert_eq!(e.to_string(), "! dom");
    }

    #[test]
    fn broadcast_property() {
        let mut c = Ctx::new(1);
        assert_eq!(one(&mut c, "5+1 2 3"), one(&mut c, "(5+1),(5+2),(5+3)"));
        assert_eq!(one(&mut c, "1 2 3+5"), "6 7 8");
    }

    #[test]
    fn modulo_identity_end_to_end() {
        let mut c = Ctx::new(1);
        // ((y - y mod d) + y mod d) recovers y
        assert_eq!(one(&mut c, "x:17 40 99; (x-x!7)+x!7"), "17 40 99");
    }

    #[test]
    fn teardown_returns_every_block() {
        let mut c = Ctx::new(1);
        for src in [
            "x:!1000",
            "y:2 3#!6",
            "z:\"hello\",\"world\"",
            "a::{x+x}; b:a 1 2 3",
            "m:`q,1 2",
        ] {
            c.line(src).unwrap();
        }
        c.teardown();
        assert!(c.heap.quiescent());
    }

    #[test]
    fn workers_match_serial_results() {
        let mut serial = Ctx::new(1);
        let mut par = Ctx::new(4);
        for src in ["+/!100000", "|/0.5*$!9999", "+/0.25+0*$!20000"] {
            assert_eq!(one(&mut serial, src), one(&mut par, src));
        }
    }

    #[test]
    fn meta_helpers() {
        let mut c = Ctx::new(1);
        c.line("q:1; w:2.5").unwrap();
        assert_eq!(c.defined_vars(), "q w");
        assert!(c.verb_help().contains("flip"));
        c.line("x:!100000").unwrap();
        assert!(c.workspace_bytes() >= 400_000);
    }

    #[test]
    fn in_use_redefinition_rejected() {
        let mut c = Ctx::new(1);
        c.line("a::{x+1}").unwrap();
        // simulate the scope being live on the call stack
        c.scopes[0].active = 1;
        let e = c.line("a::{x+2}").unwrap_err();
        assert_eq!(e.to_string(), "  use");
        c.scopes[0].active = 0;
    }
}
