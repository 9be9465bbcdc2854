// RANKLE, an interpreter for a terse array language.

// SPDX-FileCopyrightText: © 2026 The Rankle contributors
// SPDX-License-Identifier: AGPL-3.0-only

// Rankle is licensed under the terms of the GNU Affero General Public
// License version 3. See the top level LICENSE file for the license
// text.

// <>

// src/eval.rs

// Right-to-left byte-stream evaluator. One accumulator holds the
// current right-hand value; verbs consume one single-token (or
// parenthesized) left operand; juxtaposition against a scope with a
// compiled body is user-function application, against anything else
// it is indexing. Errors release every pending intermediate before
// surfacing.

// <>

use crate::core::{self, Val, NONE};
use crate::verbs::{self, VERB_COUNT};
use crate::{
    Ctx, ErrCode, B_ASSIGN, B_CLOSE, B_CONST0, B_OPEN, B_SEP, B_VERB0, BODY_MAX, SLOT_VARS,
    SLOT_X, SLOT_Y,
};

/// An error code paired with the glyph of the verb that raised it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalErr {
    pub code: ErrCode,
    pub glyph: u8,
}

impl EvalErr {
    fn bare(code: ErrCode) -> Self {
        Self { code, glyph: b' ' }
    }
}

impl From<ErrCode> for EvalErr {
    fn from(code: ErrCode) -> Self {
        Self::bare(code)
    }
}

#[inline(always)]
fn operand_end_p(b: u8) -> bool {
    b < SLOT_VARS as u8 || b >= B_CONST0 || b == B_CLOSE
}

/// Runs every statement of a scope's body in order; returns the last
/// statement's value and whether it was a plain assignment (quiet)
pub fn run_scope(ctx: &mut Ctx, scope: usize) -> Result<Option<(Val, bool)>, EvalErr> {
    // the body is copied out so a callee sharing this scope's table
    // cannot shift it mid-walk
    let mut body = [0u8; BODY_MAX];
    let len = ctx.scopes[scope].body_len as usize;
    body[..len].copy_from_slice(&ctx.scopes[scope].body[..len]);

    let mut last: Option<(Val, bool)> = None;
    for stmt in body[..len].split(|&b| b == B_SEP) {
        if stmt.is_empty() {
            continue;
        }
        if let Some((v, _)) = last.take() {
            ctx.heap.release(v);
        }
        let v = eval_bytes(ctx, scope, stmt)?;
        let quiet = stmt.len() >= 2 && (stmt[0] as usize) < SLOT_VARS && stmt[1] == B_ASSIGN;
        last = Some((v, quiet));
    }
    Ok(last)
}

/// Loads an operand byte: a variable slot or a parser constant.
/// The returned value is owned.
fn load_operand(ctx: &mut Ctx, scope: usize, b: u8) -> Result<Val, EvalErr> {
    let slot = if b >= B_CONST0 {
        (b - B_CONST0) as usize
    } else {
        b as usize
    };
    let v = ctx.scopes[scope].slots[slot];
    if v == NONE {
        return Err(EvalErr::bare(ErrCode::Domain));
    }
    Ok(ctx.heap.retain(v)?)
}

/// Finds the B_OPEN matching the B_CLOSE at `close`
fn match_open(code: &[u8], close: usize) -> Result<usize, EvalErr> {
    let mut depth = 1;
    let mut i = close;
    while i > 0 {
        i -= 1;
        match code[i] {
            B_CLOSE => depth += 1,
            B_OPEN => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => (),
        }
    }
    Err(EvalErr::bare(ErrCode::Parse))
}

/// Applies user-function scope `callee`: binds the right argument
/// into its x slot (and a left argument into y), evaluates the body,
/// restores the previous bindings. Both arguments are consumed.
fn call_scope(
    ctx: &mut Ctx,
    callee: usize,
    left: Option<Val>,
    right: Val,
) -> Result<Val, EvalErr> {
    // there is no lazy conditional, so deep self-application is
    // always a runaway; stop it before the machine stack goes
    if ctx.scopes[callee].active >= 128 {
        if let Some(l) = left {
            ctx.heap.release(l);
        }
        ctx.heap.release(right);
        return Err(EvalErr::bare(ErrCode::Domain));
    }
    let saved_x = ctx.scopes[callee].slots[SLOT_X];
    let saved_y = ctx.scopes[callee].slots[SLOT_Y];
    ctx.scopes[callee].slots[SLOT_X] = right;
    ctx.scopes[callee].slots[SLOT_Y] = left.unwrap_or(NONE);
    ctx.scopes[callee].active += 1;

    let res = run_scope(ctx, callee);

    ctx.scopes[callee].active -= 1;
    let bound_x = std::mem::replace(&mut ctx.scopes[callee].slots[SLOT_X], saved_x);
    let bound_y = std::mem::replace(&mut ctx.scopes[callee].slots[SLOT_Y], saved_y);
    ctx.heap.release(bound_x);
    ctx.heap.release(bound_y);

    match res? {
        Some((v, _)) => Ok(v),
        None => Err(EvalErr::bare(ErrCode::Domain)),
    }
}

/// Juxtaposition: scope letters with compiled bodies apply as
/// functions, everything else indexes
fn apply_juxt(ctx: &mut Ctx, scope: usize, code: &[u8], i: &mut usize, acc: Val) -> Result<Val, EvalErr> {
    let b = code[*i];
    if (b as usize) < SLOT_VARS && ctx.scopes[b as usize].body_len > 0 {
        let callee = b as usize;
        // a preceding operand becomes the left argument
        let left = if *i > 0 && operand_end_p(code[*i - 1]) {
            match take_left(ctx, scope, code, i) {
                Ok(v) => Some(v),
                Err(e) => {
                    ctx.heap.release(acc);
                    return Err(e);
                }
            }
        } else {
            None
        };
        return call_scope(ctx, callee, left, acc);
    }

    let f = match load_operand(ctx, scope, b) {
        Ok(v) => v,
        Err(e) => {
            ctx.heap.release(acc);
            return Err(e);
        }
    };
    let res = verbs::dispatch(ctx, verbs::V_AT, Some(f), acc);
    ctx.heap.release(f);
    ctx.heap.release(acc);
    res.map_err(|code| EvalErr {
        code,
        glyph: verbs::glyph(verbs::V_AT),
    })
}

/// Consumes the single-token or parenthesized operand ending at
/// code[*i - 1]; leaves *i at its first byte
fn take_left(
    ctx: &mut Ctx,
    scope: usize,
    code: &[u8],
    i: &mut usize,
) -> Result<Val, EvalErr> {
    if code[*i - 1] == B_CLOSE {
        let open = match_open(code, *i - 1)?;
        let v = eval_bytes(ctx, scope, &code[open + 1..*i - 1])?;
        *i = open;
        Ok(v)
    } else {
        *i -= 1;
        load_operand(ctx, scope, code[*i])
    }
}

/// The core scan: strictly right to left, one accumulator
fn eval_bytes(ctx: &mut Ctx, scope: usize, code: &[u8]) -> Result<Val, EvalErr> {
    let mut acc: Option<Val> = None;
    let mut i = code.len();

    macro_rules! fail {
        ($err:expr) => {{
            if let Some(a) = acc {
                ctx.heap.release(a);
            }
            return Err($err);
        }};
    }

    while i > 0 {
        i -= 1;
        let b = code[i];

        if b == B_CLOSE {
            let open = match match_open(code, i) {
                Ok(o) => o,
                Err(e) => fail!(e),
            };
            let inner = &code[open + 1..i];
            i = open;
            let v = match eval_bytes(ctx, scope, inner) {
                Ok(v) => v,
                Err(e) => fail!(e),
            };
            acc = Some(match acc.take() {
                None => v,
                // a parenthesized value juxtaposed onto the
                // accumulator indexes it
                Some(a) => {
                    let res = verbs::dispatch(ctx, verbs::V_AT, Some(v), a);
                    ctx.heap.release(v);
                    ctx.heap.release(a);
                    match res {
                        Ok(r) => r,
                        Err(code) => fail!(EvalErr {
                            code,
                            glyph: verbs::glyph(verbs::V_AT)
                        }),
                    }
                }
            });
        } else if b == B_ASSIGN {
            if i == 0 {
                fail!(EvalErr::bare(ErrCode::Parse));
            }
            i -= 1;
            let slot = code[i] as usize;
            if slot >= SLOT_VARS {
                fail!(EvalErr::bare(ErrCode::Parse));
            }
            let v = match acc {
                Some(v) => v,
                None => fail!(EvalErr::bare(ErrCode::Parse)),
            };
            if let Err(e) = ctx.heap.retain(v) {
                fail!(EvalErr::bare(e));
            }
            let old = std::mem::replace(&mut ctx.scopes[scope].slots[slot], v);
            ctx.heap.release(old);
        } else if (B_VERB0..B_VERB0 + VERB_COUNT as u8).contains(&b) {
            let verb = b - B_VERB0;
            let r = match acc.take() {
                Some(v) => v,
                None => fail!(EvalErr {
                    code: ErrCode::Parse,
                    glyph: verbs::glyph(verb)
                }),
            };
            let left = if i > 0 && operand_end_p(code[i - 1]) {
                match take_left(ctx, scope, code, &mut i) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        ctx.heap.release(r);
                        return Err(e);
                    }
                }
            } else {
                None
            };
            let res = verbs::dispatch(ctx, verb, left, r);
            if let Some(l) = left {
                ctx.heap.release(l);
            }
            ctx.heap.release(r);
            match res {
                Ok(v) => acc = Some(v),
                Err(code) => {
                    return Err(EvalErr {
                        code,
                        glyph: verbs::glyph(verb),
                    })
                }
            }
        } else if operand_end_p(b) {
            acc = Some(match acc.take() {
                None => match load_operand(ctx, scope, b) {
                    Ok(v) => v,
                    Err(e) => return Err(e),
                },
                Some(a) => match apply_juxt(ctx, scope, code, &mut i, a) {
                    Ok(v) => v,
                    Err(e) => return Err(e),
                },
            });
        } else {
            fail!(EvalErr::bare(ErrCode::Parse));
        }
    }

    match acc {
        Some(v) => Ok(v),
        None => Err(EvalErr::bare(ErrCode::Parse)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn run(ctx: &mut Ctx, src: &str) -> Result<Option<(Val, bool)>, EvalErr> {
        parser::compile_line(ctx, src).map_err(EvalErr::bare)?;
        run_scope(ctx, crate::TOP_SCOPE)
    }

    #[test]
    fn right_to_left_precedence() {
        let mut c = Ctx::new(1);
        let (v, quiet) = run(&mut c, "2*3+4").unwrap().unwrap();
        assert_eq!(core::int_get(v), 14);
        assert!(!quiet);
        c.heap.release(v);
    }

    #[test]
    fn parenthesization_overrides() {
        let mut c = Ctx::new(1);
        let (v, _) = run(&mut c, "(2*3)+4").unwrap().unwrap();
        assert_eq!(core::int_get(v), 10);
        c.heap.release(v);
    }

    #[test]
    fn assignment_is_quiet_and_binds() {
        let mut c = Ctx::new(1);
        let (v, quiet) = run(&mut c, "x:5").unwrap().unwrap();
        assert!(quiet);
        assert_eq!(core::int_get(v), 5);
        c.heap.release(v);
        let (v, quiet) = run(&mut c, "x+1").unwrap().unwrap();
        assert!(!quiet);
        assert_eq!(core::int_get(v), 6);
        c.heap.release(v);
    }

    #[test]
    fn assignment_value_flows_on() {
        let mut c = Ctx::new(1);
        let (v, quiet) = run(&mut c, "2*x:3").unwrap().unwrap();
        assert_eq!(core::int_get(v), 6);
        assert!(!quiet);
        c.heap.release(v);
    }

    #[test]
    fn statements_run_left_to_right() {
        let mut c = Ctx::new(1);
        let (v, _) = run(&mut c, "x:2; y:3; x*y").unwrap().unwrap();
        assert_eq!(core::int_get(v), 6);
        c.heap.release(v);
    }

    #[test]
    fn unbound_variable_is_domain() {
        let mut c = Ctx::new(1);
        let e = run(&mut c, "q+1").unwrap_err();
        assert_eq!(e.code, ErrCode::Domain);
    }

    #[test]
    fn user_function_application() {
        let mut c = Ctx::new(1);
        assert!(run(&mut c, "a::{x+1}").unwrap().is_none());
        let (v, _) = run(&mut c, "a 4").unwrap().unwrap();
        assert_eq!(core::int_get(v), 5);
        c.heap.release(v);
    }

    #[test]
    fn dyadic_user_function() {
        let mut c = Ctx::new(1);
        run(&mut c, "f::{y-x}").unwrap();
        let (v, _) = run(&mut c, "10 f 3").unwrap().unwrap();
        assert_eq!(core::int_get(v), 7);
        c.heap.release(v);
    }

    #[test]
    fn juxtaposition_indexes_arrays() {
        let mut c = Ctx::new(1);
        run(&mut c, "x:10 20 30").map(|o| o.map(|(v, _)| c.heap.release(v))).unwrap();
        let (v, _) = run(&mut c, "x 1").unwrap().unwrap();
        assert_eq!(core::int_get(v), 20);
        c.heap.release(v);
    }

    #[test]
    fn error_releases_intermediates() {
        let mut c = Ctx::new(1);
        let e = run(&mut c, "(!3)+!4").unwrap_err();
        assert_eq!(e.code, ErrCode::Length);
        assert_eq!(e.glyph, b'+');
        // the two enumerations must have been reclaimed
        run(&mut c, "x:0").map(|o| o.map(|(v, _)| c.heap.release(v))).unwrap();
        c.teardown();
        assert!(c.heap.quiescent());
    }

    #[test]
    fn failed_statement_leaves_slot_untouched() {
        let mut c = Ctx::new(1);
        run(&mut c, "x:7").map(|o| o.map(|(v, _)| c.heap.release(v))).unwrap();
        let e = run(&mut c, "x:!-1").unwrap_err();
        assert_eq!(e.code, ErrCode::Domain);
        let (v, _) = run(&mut c, "x").unwrap().unwrap();
        assert_eq!(core::int_get(v), 7);
        c.heap.release(v);
    }

    #[test]
    fn functions_compose() {
        let mut c = Ctx::new(1);
        run(&mut c, "g::{2*x}").unwrap();
        run(&mut c, "f::{g x+1}").unwrap();
        let (v, _) = run(&mut c, "f 3").unwrap().unwrap();
        assert_eq!(core::int_get(v), 8);
        c.heap.release(v);
    }

    #[test]
    fn runaway_recursion_is_cut_off() {
        let mut c = Ctx::new(1);
        run(&mut c, "f::{f x}").unwrap();
        let e = run(&mut c, "f 1").unwrap_err();
        assert_eq!(e.code, ErrCode::Domain);
        c.teardown();
        assert!(c.heap.quiescent());
    }
}
