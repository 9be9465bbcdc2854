// RANKLE, an interpreter for a terse array language.

// SPDX-FileCopyrightText: © 2026 The Rankle contributors
// SPDX-License-Identifier: AGPL-3.0-only

// Rankle is licensed under the terms of the GNU Affero General Public
// License version 3. See the top level LICENSE file for the license
// text.

// <>

// src/verbs.rs

// Verb dispatch: maps (verb code, operand tags, operand shapes) to a
// kernel, allocating the result and broadcasting scalars. This is
// the only layer that turns handles into typed slices; kernels never
// see a handle and the evaluator never sees a buffer.

// <>

use std::slice;

use crate::core::{self, Atom, Tag, Val};
use crate::kernels::rand::Prng;
use crate::kernels::{arith, bit_at, mask_tail, matmul, pack_bits, permute, reduce};
use crate::memmgt::Heap;
use crate::workers::{
    self, BinScalSpan, BinSpan, MatSpan, RedSpan, RowSpan, ScalBinSpan, UnSpan, MAX_WAYS,
};
use crate::{Ctx, ErrCode};

pub const V_ADD: u8 = 0;
pub const V_SUB: u8 = 1;
pub const V_MUL: u8 = 2;
pub const V_DIV: u8 = 3;
pub const V_MOD: u8 = 4;
pub const V_MIN: u8 = 5;
pub const V_MAX: u8 = 6;
pub const V_LESS: u8 = 7;
pub const V_MORE: u8 = 8;
pub const V_EQ: u8 = 9;
pub const V_NOT: u8 = 10;
pub const V_CAT: u8 = 11;
pub const V_SHAPE: u8 = 12;
pub const V_CUT: u8 = 13;
pub const V_RAND: u8 = 14;
pub const V_AT: u8 = 15;
pub const V_DOT: u8 = 16;
pub const V_EXP: u8 = 17;
pub const V_CAST: u8 = 18;
pub const V_SUMR: u8 = 19;
pub const V_MAXR: u8 = 20;
pub const V_MINR: u8 = 21;
pub const V_SQRT: u8 = 22;
pub const V_RMS: u8 = 23;
pub const V_SMAX: u8 = 24;

pub const VERB_COUNT: usize = 25;

/// Token, monadic name, dyadic name; the token doubles as the error
/// context glyph
pub static VERBS: [(&str, &str, &str); VERB_COUNT] = [
    ("+", "flip", "add"),
    ("-", "negate", "subtract"),
    ("*", "abs", "multiply"),
    ("%", "reciprocal", "divide"),
    ("!", "enum", "modulo"),
    ("&", "where", "min"),
    ("|", "reverse", "max"),
    ("<", "grade up", "less"),
    (">", "grade down", "greater"),
    ("=", "", "equal"),
    ("~", "not", ""),
    (",", "enlist", "concat"),
    ("#", "count", "take"),
    ("_", "to int", "drop"),
    ("?", "rand", ""),
    ("@", "type", "index"),
    (".", "diagonal", "dot"),
    ("^", "exp", ""),
    ("$", "to float", "cast"),
    ("+/", "sum", ""),
    ("|/", "max over", ""),
    ("&/", "min over", ""),
    ("%.", "sqrt", ""),
    ("*.", "rms norm", ""),
    ("^.", "softmax", ""),
];

/// Context glyph shown with an error from this verb
pub fn glyph(verb: u8) -> u8 {
    VERBS
        .get(verb as usize)
        .map(|v| v.0.as_bytes()[0])
        .unwrap_or(b' ')
}

// ---- typed slice access; nothing below this layer sees a handle ----

#[inline(always)]
fn words_for(bits: usize) -> usize {
    bits.div_ceil(64)
}

macro_rules! slice_access {
    ( $( $ro:ident $rw:ident : $t:ty ; )+ ) => {
        $(
            #[inline(always)]
            pub(crate) fn $ro(heap: &Heap, v: Val) -> &[$t] {
                unsafe { slice::from_raw_parts(heap.base(v) as *const $t, core::stored_count(v)) }
            }

            /// Only ever called on a freshly allocated result handle,
            /// so the mutable slice cannot alias a source
            #[inline(always)]
            #[allow(clippy::mut_from_ref)]
            pub(crate) fn $rw(heap: &Heap, v: Val) -> &mut [$t] {
                unsafe {
                    slice::from_raw_parts_mut(heap.base(v) as *mut $t, core::stored_count(v))
                }
            }
        )+
    };
}

slice_access! {
    i32s i32s_mut : i32;
    f32s f32s_mut : f32;
    u8s u8s_mut : u8;
    u32s u32s_mut : u32;
    vals vals_mut : Val;
}

#[inline(always)]
pub(crate) fn bits(heap: &Heap, v: Val) -> &[u64] {
    unsafe {
        slice::from_raw_parts(
            heap.base(v) as *const u64,
            words_for(core::stored_count(v)),
        )
    }
}

#[inline(always)]
#[allow(clippy::mut_from_ref)]
pub(crate) fn bits_mut(heap: &Heap, v: Val) -> &mut [u64] {
    unsafe {
        slice::from_raw_parts_mut(heap.base(v) as *mut u64, words_for(core::stored_count(v)))
    }
}

// ---- scalar views and conversion ----

fn atom_to_int(v: Val) -> i32 {
    match core::atom_view(v).unwrap() {
        Atom::Bit(b) => b as i32,
        Atom::Byte(b) => b as i32,
        Atom::Int(i) => i,
        _ => unreachable!("int view of wide atom"),
    }
}

fn atom_to_f32(v: Val) -> f32 {
    match core::atom_view(v).unwrap() {
        Atom::Bit(b) => b as i32 as f32,
        Atom::Byte(b) => b as f32,
        Atom::Int(i) => i as f32,
        Atom::Float(f) => f,
        _ => unreachable!("float view of symbol"),
    }
}

fn atom_to_u8(v: Val) -> u8 {
    match core::atom_view(v).unwrap() {
        Atom::Bit(b) => b as u8,
        Atom::Byte(b) => b,
        Atom::Int(i) => i as u8,
        Atom::Float(f) => f as u8,
        _ => unreachable!("byte view of symbol"),
    }
}

fn atom_to_bit(v: Val) -> bool {
    match core::atom_view(v).unwrap() {
        Atom::Bit(b) => b,
        Atom::Byte(b) => b != 0,
        Atom::Int(i) => i != 0,
        Atom::Float(f) => f != 0.0,
        _ => unreachable!("bit view of symbol"),
    }
}

fn numeric_p(t: Tag) -> bool {
    matches!(t, Tag::Bit | Tag::Byte | Tag::Int | Tag::Float)
}

/// Result tag by the conversion ordering bit < byte < int < float
fn promote(l: Tag, r: Tag) -> Result<Tag, ErrCode> {
    if !numeric_p(l) || !numeric_p(r) {
        return Err(ErrCode::Type);
    }
    Ok(if l.rank() >= r.rank() { l } else { r })
}

/// Returns an owned value of the requested numeric tag, converting
/// through the matching kernel when the source is an array
pub fn convert(ctx: &mut Ctx, v: Val, to: Tag) -> Result<Val, ErrCode> {
    let from = core::tag(v);
    if from == to {
        return ctx.heap.retain(v);
    }
    if !numeric_p(from) || !numeric_p(to) {
        return Err(ErrCode::Type);
    }
    if !core::boxed_p(v) {
        return Ok(match to {
            Tag::Bit => core::atom_bit(atom_to_bit(v)),
            Tag::Byte => core::atom_byte(atom_to_u8(v)),
            Tag::Int => core::atom_int(match from {
                Tag::Float => core::float_get(v) as i32,
                _ => atom_to_int(v),
            }),
            Tag::Float => core::atom_float(atom_to_f32(v)),
            _ => unreachable!(),
        });
    }

    let out = alloc_like(ctx, to, v)?;
    let heap = &ctx.heap;
    match (from, to) {
        (Tag::Bit, Tag::Byte) => arith::bits_to_byte(u8s_mut(heap, out), bits(heap, v)),
        (Tag::Bit, Tag::Int) => arith::bits_to_int(i32s_mut(heap, out), bits(heap, v)),
        (Tag::Bit, Tag::Float) => arith::bits_to_float(f32s_mut(heap, out), bits(heap, v)),
        (Tag::Byte, Tag::Int) => arith::byte_to_int(i32s_mut(heap, out), u8s(heap, v)),
        (Tag::Byte, Tag::Float) => arith::byte_to_float(f32s_mut(heap, out), u8s(heap, v)),
        (Tag::Byte, Tag::Bit) => arith::byte_to_bits(bits_mut(heap, out), u8s(heap, v)),
        (Tag::Int, Tag::Float) => run_un_i2f(ctx, out, v),
        (Tag::Int, Tag::Byte) => arith::int_to_byte(u8s_mut(heap, out), i32s(heap, v)),
        (Tag::Int, Tag::Bit) => arith::int_to_bits(bits_mut(heap, out), i32s(heap, v)),
        (Tag::Float, Tag::Int) => arith::float_to_int(i32s_mut(heap, out), f32s(heap, v)),
        (Tag::Float, Tag::Byte) => arith::float_to_byte(u8s_mut(heap, out), f32s(heap, v)),
        (Tag::Float, Tag::Bit) => arith::float_to_bits(bits_mut(heap, out), f32s(heap, v)),
        _ => unreachable!(),
    }
    Ok(out)
}

fn run_un_i2f(ctx: &Ctx, out: Val, v: Val) {
    let heap = &ctx.heap;
    let sp = UnSpan::<i32, f32> {
        dst: heap.base(out) as usize,
        src: heap.base(v) as usize,
        kern: arith::int_to_float,
    };
    ctx.pool.run_split(
        workers::par_un::<i32, f32>,
        &sp as *const _ as usize,
        core::stored_count(v),
        ctx.pool.grain(),
    );
}

// ---- shapes ----

/// Allocates a result with the element tag `t` and the shape of `like`
fn alloc_like(ctx: &mut Ctx, t: Tag, like: Val) -> Result<Val, ErrCode> {
    if core::matrix_p(like) {
        ctx.heap.alloc_mat(t, core::rows(like), core::cols(like))
    } else {
        ctx.heap.alloc_vec(t, core::count(like))
    }
}

fn same_shape(l: Val, r: Val) -> Result<(), ErrCode> {
    if core::matrix_p(l) != core::matrix_p(r) {
        return Err(ErrCode::Rank);
    }
    if core::matrix_p(l) {
        if core::rows(l) != core::rows(r) || core::cols(l) != core::cols(r) {
            return Err(ErrCode::Rank);
        }
    } else if core::count(l) != core::count(r) {
        return Err(ErrCode::Length);
    }
    Ok(())
}

// ---- binary element-wise family ----

#[derive(Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Lt,
    Gt,
    Eq,
}

fn kern_i32_aa(op: BinOp) -> fn(&mut [i32], &[i32], &[i32]) {
    match op {
        BinOp::Add => arith::add_i32_aa,
        BinOp::Sub => arith::sub_i32_aa,
        BinOp::Mul => arith::mul_i32_aa,
        BinOp::Min => arith::min_i32_aa,
        BinOp::Max => arith::max_i32_aa,
        _ => unreachable!("no int kernel"),
    }
}

fn kern_i32_as(op: BinOp) -> fn(&mut [i32], &[i32], i32) {
    match op {
        BinOp::Add => arith::add_i32_as,
        BinOp::Sub => arith::sub_i32_as,
        BinOp::Mul => arith::mul_i32_as,
        BinOp::Min => arith::min_i32_as,
        BinOp::Max => arith::max_i32_as,
        _ => unreachable!("no int kernel"),
    }
}

fn kern_i32_sa(op: BinOp) -> fn(&mut [i32], i32, &[i32]) {
    match op {
        BinOp::Add => arith::add_i32_sa,
        BinOp::Sub => arith::sub_i32_sa,
        BinOp::Mul => arith::mul_i32_sa,
        BinOp::Min => arith::min_i32_sa,
        BinOp::Max => arith::max_i32_sa,
        _ => unreachable!("no int kernel"),
    }
}

fn kern_f32_aa(op: BinOp) -> fn(&mut [f32], &[f32], &[f32]) {
    match op {
        BinOp::Add => arith::add_f32_aa,
        BinOp::Sub => arith::sub_f32_aa,
        BinOp::Mul => arith::mul_f32_aa,
        BinOp::Div => arith::div_f32_aa,
        BinOp::Min => arith::min_f32_aa,
        BinOp::Max => arith::max_f32_aa,
        _ => unreachable!("no float kernel"),
    }
}

fn kern_f32_as(op: BinOp) -> fn(&mut [f32], &[f32], f32) {
    match op {
        BinOp::Add => arith::add_f32_as,
        BinOp::Sub => arith::sub_f32_as,
        BinOp::Mul => arith::mul_f32_as,
        BinOp::Div => arith::div_f32_as,
        BinOp::Min => arith::min_f32_as,
        BinOp::Max => arith::max_f32_as,
        _ => unreachable!("no float kernel"),
    }
}

fn kern_f32_sa(op: BinOp) -> fn(&mut [f32], f32, &[f32]) {
    match op {
        BinOp::Add => arith::add_f32_sa,
        BinOp::Sub => arith::sub_f32_sa,
        BinOp::Mul => arith::mul_f32_sa,
        BinOp::Div => arith::div_f32_sa,
        BinOp::Min => arith::min_f32_sa,
        BinOp::Max => arith::max_f32_sa,
        _ => unreachable!("no float kernel"),
    }
}

fn kern_u8_aa(op: BinOp) -> fn(&mut [u8], &[u8], &[u8]) {
    match op {
        BinOp::Add => arith::add_u8_aa,
        BinOp::Sub => arith::sub_u8_aa,
        BinOp::Mul => arith::mul_u8_aa,
        BinOp::Min => arith::min_u8_aa,
        BinOp::Max => arith::max_u8_aa,
        _ => unreachable!("no byte kernel"),
    }
}

fn kern_u8_as(op: BinOp) -> fn(&mut [u8], &[u8], u8) {
    match op {
        BinOp::Add => arith::add_u8_as,
        BinOp::Sub => arith::sub_u8_as,
        BinOp::Mul => arith::mul_u8_as,
        BinOp::Min => arith::min_u8_as,
        BinOp::Max => arith::max_u8_as,
        _ => unreachable!("no byte kernel"),
    }
}

fn kern_u8_sa(op: BinOp) -> fn(&mut [u8], u8, &[u8]) {
    match op {
        BinOp::Add => arith::add_u8_sa,
        BinOp::Sub => arith::sub_u8_sa,
        BinOp::Mul => arith::mul_u8_sa,
        BinOp::Min => arith::min_u8_sa,
        BinOp::Max => arith::max_u8_sa,
        _ => unreachable!("no byte kernel"),
    }
}

/// Scalar-scalar evaluation in the working tag; never allocates
fn scalar_bin(op: BinOp, work: Tag, l: Val, r: Val) -> Result<Val, ErrCode> {
    Ok(match work {
        Tag::Float => {
            let (x, y) = (atom_to_f32(l), atom_to_f32(r));
            match op {
                BinOp::Add => core::atom_float(x + y),
                BinOp::Sub => core::atom_float(x - y),
                BinOp::Mul => core::atom_float(x * y),
                BinOp::Div => core::atom_float(x / y),
                BinOp::Min => core::atom_float(x.min(y)),
                BinOp::Max => core::atom_float(x.max(y)),
                BinOp::Lt => core::atom_bit(x < y),
                BinOp::Gt => core::atom_bit(x > y),
                BinOp::Eq => core::atom_bit(x == y),
            }
        }
        Tag::Int | Tag::Byte => {
            let (x, y) = (atom_to_int(l), atom_to_int(r));
            match op {
                BinOp::Add if work == Tag::Byte => core::atom_byte((x as u8).wrapping_add(y as u8)),
                BinOp::Sub if work == Tag::Byte => core::atom_byte((x as u8).wrapping_sub(y as u8)),
                BinOp::Mul if work == Tag::Byte => core::atom_byte((x as u8).wrapping_mul(y as u8)),
                BinOp::Min if work == Tag::Byte => core::atom_byte((x as u8).min(y as u8)),
                BinOp::Max if work == Tag::Byte => core::atom_byte((x as u8).max(y as u8)),
                BinOp::Add => core::atom_int(x.wrapping_add(y)),
                BinOp::Sub => core::atom_int(x.wrapping_sub(y)),
                BinOp::Mul => core::atom_int(x.wrapping_mul(y)),
                BinOp::Min => core::atom_int(x.min(y)),
                BinOp::Max => core::atom_int(x.max(y)),
                BinOp::Lt => core::atom_bit(x < y),
                BinOp::Gt => core::atom_bit(x > y),
                BinOp::Eq => core::atom_bit(x == y),
                BinOp::Div => unreachable!("divide works in float"),
            }
        }
        Tag::Bit => {
            let (x, y) = (core::bit_get(l), core::bit_get(r));
            match op {
                BinOp::Add | BinOp::Sub => core::atom_bit(x ^ y),
                BinOp::Mul | BinOp::Min => core::atom_bit(x & y),
                BinOp::Max => core::atom_bit(x | y),
                _ => unreachable!("bit comparisons work in byte"),
            }
        }
        _ => return Err(ErrCode::Type),
    })
}

fn bin_elementwise(ctx: &mut Ctx, op: BinOp, l: Val, r: Val) -> Result<Val, ErrCode> {
    let compare = matches!(op, BinOp::Lt | BinOp::Gt | BinOp::Eq);

    // symbols compare with = and nothing else
    if core::tag(l) == Tag::Sym || core::tag(r) == Tag::Sym {
        if op != BinOp::Eq || core::tag(l) != Tag::Sym || core::tag(r) != Tag::Sym {
            return Err(ErrCode::Type);
        }
        return sym_eq(ctx, l, r);
    }

    let mut work = match op {
        BinOp::Div => {
            promote(core::tag(l), core::tag(r))?;
            Tag::Float
        }
        _ => promote(core::tag(l), core::tag(r))?,
    };
    if compare && work == Tag::Bit {
        work = Tag::Byte;
    }

    if !core::boxed_p(l) && !core::boxed_p(r) {
        return scalar_bin(op, work, l, r);
    }
    if core::boxed_p(l) && core::boxed_p(r) {
        same_shape(l, r)?;
    }

    let lc = convert(ctx, l, work)?;
    let rc = match convert(ctx, r, work) {
        Ok(v) => v,
        Err(e) => {
            ctx.heap.release(lc);
            return Err(e);
        }
    };

    let shape = if core::boxed_p(lc) { lc } else { rc };
    let out_tag = if compare { Tag::Bit } else { work };
    let out = match alloc_like(ctx, out_tag, shape) {
        Ok(v) => v,
        Err(e) => {
            ctx.heap.release(lc);
            ctx.heap.release(rc);
            return Err(e);
        }
    };

    let n = core::stored_count(shape);
    let heap = &ctx.heap;
    let pool = &ctx.pool;
    match (work, core::boxed_p(lc), core::boxed_p(rc), compare) {
        // packed bit arrays: word-wise, never split
        (Tag::Bit, true, true, false) => {
            let k = match op {
                BinOp::Add | BinOp::Sub => arith::xor_bits_aa,
                BinOp::Mul | BinOp::Min => arith::and_bits_aa,
                BinOp::Max => arith::or_bits_aa,
                _ => unreachable!(),
            };
            k(bits_mut(heap, out), bits(heap, lc), bits(heap, rc));
        }
        (Tag::Bit, la, _, false) => {
            let (arr, at) = if la { (lc, rc) } else { (rc, lc) };
            let k = match op {
                BinOp::Add | BinOp::Sub => arith::xor_bits_as,
                BinOp::Mul | BinOp::Min => arith::and_bits_as,
                BinOp::Max => arith::or_bits_as,
                _ => unreachable!(),
            };
            k(bits_mut(heap, out), bits(heap, arr), core::bit_get(at));
        }

        (Tag::Int, true, true, false) => {
            let sp = BinSpan {
                dst: heap.base(out) as usize,
                a: heap.base(lc) as usize,
                b: heap.base(rc) as usize,
                kern: kern_i32_aa(op),
                _t: std::marker::PhantomData,
            };
            pool.run_split(workers::par_bin::<i32>, &sp as *const _ as usize, n, pool.grain());
        }
        (Tag::Int, true, false, false) => {
            let sp = BinScalSpan {
                dst: heap.base(out) as usize,
                a: heap.base(lc) as usize,
                s: core::int_get(rc),
                kern: kern_i32_as(op),
            };
            pool.run_split(
                workers::par_bin_scal::<i32>,
                &sp as *const _ as usize,
                n,
                pool.grain(),
            );
        }
        (Tag::Int, false, true, false) => {
            let sp = ScalBinSpan {
                dst: heap.base(out) as usize,
                s: core::int_get(lc),
                b: heap.base(rc) as usize,
                kern: kern_i32_sa(op),
            };
            pool.run_split(
                workers::par_scal_bin::<i32>,
                &sp as *const _ as usize,
                n,
                pool.grain(),
            );
        }

        (Tag::Float, true, true, false) => {
            let sp = BinSpan {
                dst: heap.base(out) as usize,
                a: heap.base(lc) as usize,
                b: heap.base(rc) as usize,
                kern: kern_f32_aa(op),
                _t: std::marker::PhantomData,
            };
            pool.run_split(workers::par_bin::<f32>, &sp as *const _ as usize, n, pool.grain());
        }
        (Tag::Float, true, false, false) => {
            let sp = BinScalSpan {
                dst: heap.base(out) as usize,
                a: heap.base(lc) as usize,
                s: core::float_get(rc),
                kern: kern_f32_as(op),
            };
            pool.run_split(
                workers::par_bin_scal::<f32>,
                &sp as *const _ as usize,
                n,
                pool.grain(),
            );
        }
        (Tag::Float, false, true, false) => {
            let sp = ScalBinSpan {
                dst: heap.base(out) as usize,
                s: core::float_get(lc),
                b: heap.base(rc) as usize,
                kern: kern_f32_sa(op),
            };
            pool.run_split(
                workers::par_scal_bin::<f32>,
                &sp as *const _ as usize,
                n,
                pool.grain(),
            );
        }

        (Tag::Byte, true, true, false) => {
            kern_u8_aa(op)(u8s_mut(heap, out), u8s(heap, lc), u8s(heap, rc));
        }
        (Tag::Byte, true, false, false) => {
            kern_u8_as(op)(u8s_mut(heap, out), u8s(heap, lc), core::byte_get(rc));
        }
        (Tag::Byte, false, true, false) => {
            kern_u8_sa(op)(u8s_mut(heap, out), core::byte_get(lc), u8s(heap, rc));
        }

        // comparisons pack bits; serial
        (Tag::Int, la, ra, true) => {
            let d = bits_mut(heap, out);
            match (la, ra, op) {
                (true, true, BinOp::Lt) => arith::lt_i32_aa(d, i32s(heap, lc), i32s(heap, rc)),
                (true, true, BinOp::Gt) => arith::gt_i32_aa(d, i32s(heap, lc), i32s(heap, rc)),
                (true, true, BinOp::Eq) => arith::eq_i32_aa(d, i32s(heap, lc), i32s(heap, rc)),
                (true, false, BinOp::Lt) => arith::lt_i32_as(d, i32s(heap, lc), core::int_get(rc)),
                (true, false, BinOp::Gt) => arith::gt_i32_as(d, i32s(heap, lc), core::int_get(rc)),
                (true, false, BinOp::Eq) => arith::eq_i32_as(d, i32s(heap, lc), core::int_get(rc)),
                (false, true, BinOp::Lt) => arith::lt_i32_sa(d, core::int_get(lc), i32s(heap, rc)),
                (false, true, BinOp::Gt) => arith::gt_i32_sa(d, core::int_get(lc), i32s(heap, rc)),
                (false, true, BinOp::Eq) => arith::eq_i32_sa(d, core::int_get(lc), i32s(heap, rc)),
                _ => unreachable!(),
            }
        }
        (Tag::Float, la, ra, true) => {
            let d = bits_mut(heap, out);
            match (la, ra, op) {
                (true, true, BinOp::Lt) => arith::lt_f32_aa(d, f32s(heap, lc), f32s(heap, rc)),
                (true, true, BinOp::Gt) => arith::gt_f32_aa(d, f32s(heap, lc), f32s(heap, rc)),
                (true, true, BinOp::Eq) => arith::eq_f32_aa(d, f32s(heap, lc), f32s(heap, rc)),
                (true, false, BinOp::Lt) => arith::lt_f32_as(d, f32s(heap, lc), core::float_get(rc)),
                (true, false, BinOp::Gt) => arith::gt_f32_as(d, f32s(heap, lc), core::float_get(rc)),
                (true, false, BinOp::Eq) => arith::eq_f32_as(d, f32s(heap, lc), core::float_get(rc)),
                (false, true, BinOp::Lt) => arith::lt_f32_sa(d, core::float_get(lc), f32s(heap, rc)),
                (false, true, BinOp::Gt) => arith::gt_f32_sa(d, core::float_get(lc), f32s(heap, rc)),
                (false, true, BinOp::Eq) => arith::eq_f32_sa(d, core::float_get(lc), f32s(heap, rc)),
                _ => unreachable!(),
            }
        }
        (Tag::Byte, la, ra, true) => {
            let d = bits_mut(heap, out);
            match (la, ra, op) {
                (true, true, BinOp::Lt) => arith::lt_u8_aa(d, u8s(heap, lc), u8s(heap, rc)),
                (true, true, BinOp::Gt) => arith::gt_u8_aa(d, u8s(heap, lc), u8s(heap, rc)),
                (true, true, BinOp::Eq) => arith::eq_u8_aa(d, u8s(heap, lc), u8s(heap, rc)),
                (true, false, BinOp::Lt) => arith::lt_u8_as(d, u8s(heap, lc), core::byte_get(rc)),
                (true, false, BinOp::Gt) => arith::gt_u8_as(d, u8s(heap, lc), core::byte_get(rc)),
                (true, false, BinOp::Eq) => arith::eq_u8_as(d, u8s(heap, lc), core::byte_get(rc)),
                (false, true, BinOp::Lt) => arith::lt_u8_sa(d, core::byte_get(lc), u8s(heap, rc)),
                (false, true, BinOp::Gt) => arith::gt_u8_sa(d, core::byte_get(lc), u8s(heap, rc)),
                (false, true, BinOp::Eq) => arith::eq_u8_sa(d, core::byte_get(lc), u8s(heap, rc)),
                _ => unreachable!(),
            }
        }
        _ => unreachable!(),
    }

    ctx.heap.release(lc);
    ctx.heap.release(rc);
    Ok(out)
}

fn sym_eq(ctx: &mut Ctx, l: Val, r: Val) -> Result<Val, ErrCode> {
    if core::matrix_p(l) || core::matrix_p(r) {
        return Err(ErrCode::Rank);
    }
    match (core::boxed_p(l), core::boxed_p(r)) {
        (false, false) => Ok(core::atom_bit(core::sym_get(l) == core::sym_get(r))),
        (true, true) => {
            same_shape(l, r)?;
            let out = ctx.heap.alloc_vec(Tag::Bit, core::count(l))?;
            let heap = &ctx.heap;
            arith::eq_sym_aa(bits_mut(heap, out), u32s(heap, l), u32s(heap, r));
            Ok(out)
        }
        (true, false) => {
            let out = ctx.heap.alloc_vec(Tag::Bit, core::count(l))?;
            let heap = &ctx.heap;
            arith::eq_sym_as(bits_mut(heap, out), u32s(heap, l), core::sym_get(r));
            Ok(out)
        }
        (false, true) => {
            let out = ctx.heap.alloc_vec(Tag::Bit, core::count(r))?;
            let heap = &ctx.heap;
            arith::eq_sym_sa(bits_mut(heap, out), core::sym_get(l), u32s(heap, r));
            Ok(out)
        }
    }
}

/// Integer modulo; the scalar-divisor form runs the fixed-point
/// reciprocal kernel
fn modulo(ctx: &mut Ctx, l: Val, r: Val) -> Result<Val, ErrCode> {
    let (lt, rt) = (core::tag(l), core::tag(r));
    if lt == Tag::Float || rt == Tag::Float {
        return Err(ErrCode::Type);
    }
    if !core::boxed_p(l) && !core::boxed_p(r) {
        let (y, z) = (atom_to_int(l), atom_to_int(r));
        if z <= 0 {
            return Err(ErrCode::Domain);
        }
        return Ok(core::atom_int(y.rem_euclid(z)));
    }
    if core::boxed_p(l) && core::boxed_p(r) {
        same_shape(l, r)?;
    }

    let lc = convert(ctx, l, Tag::Int)?;
    let rc = match convert(ctx, r, Tag::Int) {
        Ok(v) => v,
        Err(e) => {
            ctx.heap.release(lc);
            return Err(e);
        }
    };
    let shape = if core::boxed_p(lc) { lc } else { rc };
    let out = match alloc_like(ctx, Tag::Int, shape) {
        Ok(v) => v,
        Err(e) => {
            ctx.heap.release(lc);
            ctx.heap.release(rc);
            return Err(e);
        }
    };

    let heap = &ctx.heap;
    let res = match (core::boxed_p(lc), core::boxed_p(rc)) {
        (true, true) => arith::mod_i32_aa(i32s_mut(heap, out), i32s(heap, lc), i32s(heap, rc)),
        (true, false) => arith::mod_i32_as(i32s_mut(heap, out), i32s(heap, lc), core::int_get(rc)),
        (false, true) => arith::mod_i32_sa(i32s_mut(heap, out), core::int_get(lc), i32s(heap, rc)),
        _ => unreachable!(),
    };

    ctx.heap.release(lc);
    ctx.heap.release(rc);
    match res {
        Ok(()) => Ok(out),
        Err(e) => {
            ctx.heap.release(out);
            Err(e)
        }
    }
}

// ---- monadic handlers ----

fn negate(ctx: &mut Ctx, v: Val) -> Result<Val, ErrCode> {
    let work = if core::tag(v) == Tag::Float {
        Tag::Float
    } else {
        Tag::Int
    };
    let c = convert(ctx, v, work)?;
    if !core::boxed_p(c) {
        return Ok(match work {
            Tag::Float => core::atom_float(-core::float_get(c)),
            _ => core::atom_int(core::int_get(c).wrapping_neg()),
        });
    }
    let out = match alloc_like(ctx, work, c) {
        Ok(o) => o,
        Err(e) => {
            ctx.heap.release(c);
            return Err(e);
        }
    };
    run_unary(ctx, work, out, c, arith::neg_i32, arith::neg_f32);
    ctx.heap.release(c);
    Ok(out)
}

fn absval(ctx: &mut Ctx, v: Val) -> Result<Val, ErrCode> {
    match core::tag(v) {
        Tag::Bit | Tag::Byte => ctx.heap.retain(v),
        Tag::Int | Tag::Float => {
            let work = core::tag(v);
            if !core::boxed_p(v) {
                return Ok(match work {
                    Tag::Float => core::atom_float(core::float_get(v).abs()),
                    _ => core::atom_int(core::int_get(v).wrapping_abs()),
                });
            }
            let out = alloc_like(ctx, work, v)?;
            run_unary(ctx, work, out, v, arith::abs_i32, arith::abs_f32);
            Ok(out)
        }
        _ => Err(ErrCode::Type),
    }
}

fn run_unary_f32(ctx: &Ctx, out: Val, src: Val, kern: fn(&mut [f32], &[f32])) {
    let heap = &ctx.heap;
    let sp = UnSpan::<f32, f32> {
        dst: heap.base(out) as usize,
        src: heap.base(src) as usize,
        kern,
    };
    ctx.pool.run_split(
        workers::par_un::<f32, f32>,
        &sp as *const _ as usize,
        core::stored_count(src),
        ctx.pool.grain(),
    );
}

/// Shared parallel driver for same-width unary kernels
fn run_unary(
    ctx: &Ctx,
    work: Tag,
    out: Val,
    src: Val,
    ki: fn(&mut [i32], &[i32]),
    kf: fn(&mut [f32], &[f32]),
) {
    let heap = &ctx.heap;
    let n = core::stored_count(src);
    match work {
        Tag::Int => {
            let sp = UnSpan::<i32, i32> {
                dst: heap.base(out) as usize,
                src: heap.base(src) as usize,
                kern: ki,
            };
            ctx.pool.run_split(
                workers::par_un::<i32, i32>,
                &sp as *const _ as usize,
                n,
                ctx.pool.grain(),
            );
        }
        Tag::Float => {
            let sp = UnSpan::<f32, f32> {
                dst: heap.base(out) as usize,
                src: heap.base(src) as usize,
                kern: kf,
            };
            ctx.pool.run_split(
                workers::par_un::<f32, f32>,
                &sp as *const _ as usize,
                n,
                ctx.pool.grain(),
            );
        }
        _ => unreachable!(),
    }
}

/// Float unary verbs: reciprocal, exp, sqrt
fn float_unary(ctx: &mut Ctx, v: Val, verb: u8) -> Result<Val, ErrCode> {
    let c = convert(ctx, v, Tag::Float)?;
    if !core::boxed_p(c) {
        let x = core::float_get(c);
        return match verb {
            V_DIV => Ok(core::atom_float(1.0 / x)),
            V_EXP => Ok(core::atom_float(arith::exp_scalar(x))),
            V_SQRT => {
                if x < 0.0 {
                    Err(ErrCode::Domain)
                } else {
                    Ok(core::atom_float(x.sqrt()))
                }
            }
            _ => unreachable!(),
        };
    }
    let out = match alloc_like(ctx, Tag::Float, c) {
        Ok(o) => o,
        Err(e) => {
            ctx.heap.release(c);
            return Err(e);
        }
    };
    let heap = &ctx.heap;
    let res = match verb {
        V_DIV => {
            run_unary_f32(ctx, out, c, arith::recip_f32);
            Ok(())
        }
        V_EXP => {
            run_unary_f32(ctx, out, c, arith::exp_f32);
            Ok(())
        }
        V_SQRT => {
            if arith::sqrt_f32(f32s_mut(heap, out), f32s(heap, c)) {
                Err(ErrCode::Domain)
            } else {
                Ok(())
            }
        }
        _ => unreachable!(),
    };
    ctx.heap.release(c);
    match res {
        Ok(()) => Ok(out),
        Err(e) => {
            ctx.heap.release(out);
            Err(e)
        }
    }
}

fn enumerate(ctx: &mut Ctx, v: Val) -> Result<Val, ErrCode> {
    if core::boxed_p(v) {
        return Err(ErrCode::Rank);
    }
    if core::tag(v) != Tag::Int && core::tag(v) != Tag::Byte && core::tag(v) != Tag::Bit {
        return Err(ErrCode::Type);
    }
    let n = atom_to_int(v);
    if n < 0 {
        return Err(ErrCode::Domain);
    }
    let out = ctx.heap.alloc_vec(Tag::Int, n as usize)?;
    let d = i32s_mut(&ctx.heap, out);
    for (i, x) in d.iter_mut().enumerate() {
        *x = i as i32;
    }
    Ok(out)
}

fn where_(ctx: &mut Ctx, v: Val) -> Result<Val, ErrCode> {
    if !core::boxed_p(v) || core::tag(v) != Tag::Bit {
        return Err(ErrCode::Type);
    }
    if core::matrix_p(v) {
        return Err(ErrCode::Rank);
    }
    let n = core::count(v);
    let hits = reduce::sum_bits(bits(&ctx.heap, v), n) as usize;
    let out = ctx.heap.alloc_vec(Tag::Int, hits)?;
    let heap = &ctx.heap;
    let src = bits(heap, v);
    let d = i32s_mut(heap, out);
    let mut k = 0;
    for i in 0..n {
        if bit_at(src, i) {
            d[k] = i as i32;
            k += 1;
        }
    }
    Ok(out)
}

fn reverse(ctx: &mut Ctx, v: Val) -> Result<Val, ErrCode> {
    if !core::boxed_p(v) {
        return Ok(v);
    }
    if core::matrix_p(v) {
        return Err(ErrCode::Nyi);
    }
    let t = core::tag(v);
    let out = ctx.heap.alloc_vec(t, core::count(v))?;
    let heap = &ctx.heap;
    match t {
        Tag::Bit => permute::reverse_bits_arr(bits_mut(heap, out), bits(heap, v), core::count(v)),
        Tag::Byte => permute::reverse(u8s_mut(heap, out), u8s(heap, v)),
        Tag::Int => permute::reverse(i32s_mut(heap, out), i32s(heap, v)),
        Tag::Sym => permute::reverse(u32s_mut(heap, out), u32s(heap, v)),
        Tag::Float => permute::reverse(f32s_mut(heap, out), f32s(heap, v)),
        Tag::Mixed => {
            permute::reverse(vals_mut(heap, out), vals(heap, v));
            for i in 0..core::count(out) {
                let e = vals(&ctx.heap, out)[i];
                ctx.heap.retain(e)?;
            }
        }
    }
    Ok(out)
}

fn grade(ctx: &mut Ctx, v: Val, descending: bool) -> Result<Val, ErrCode> {
    if !core::boxed_p(v) || core::matrix_p(v) {
        return Err(ErrCode::Rank);
    }
    let out = ctx.heap.alloc_vec(Tag::Int, core::count(v))?;
    let heap = &ctx.heap;
    match core::tag(v) {
        Tag::Int => permute::grade_i32(i32s_mut(heap, out), i32s(heap, v), descending),
        Tag::Float => permute::grade_f32(i32s_mut(heap, out), f32s(heap, v), descending),
        Tag::Byte => permute::grade_u8(i32s_mut(heap, out), u8s(heap, v), descending),
        _ => {
            ctx.heap.release(out);
            return Err(ErrCode::Type);
        }
    }
    Ok(out)
}

fn not(ctx: &mut Ctx, v: Val) -> Result<Val, ErrCode> {
    if !numeric_p(core::tag(v)) {
        return Err(ErrCode::Type);
    }
    if !core::boxed_p(v) {
        return Ok(core::atom_bit(!atom_to_bit(v)));
    }
    let out = alloc_like(ctx, Tag::Bit, v)?;
    let heap = &ctx.heap;
    match core::tag(v) {
        Tag::Bit => {
            arith::not_bits(bits_mut(heap, out), bits(heap, v));
            mask_tail(bits_mut(heap, out), core::stored_count(v));
        }
        Tag::Byte => arith::not_u8(bits_mut(heap, out), u8s(heap, v)),
        Tag::Int => arith::not_i32(bits_mut(heap, out), i32s(heap, v)),
        Tag::Float => arith::not_f32(bits_mut(heap, out), f32s(heap, v)),
        _ => unreachable!(),
    }
    Ok(out)
}

fn enlist(ctx: &mut Ctx, v: Val) -> Result<Val, ErrCode> {
    if core::boxed_p(v) {
        let out = ctx.heap.alloc_vec(Tag::Mixed, 1)?;
        let kept = ctx.heap.retain(v)?;
        vals_mut(&ctx.heap, out)[0] = kept;
        return Ok(out);
    }
    let t = core::tag(v);
    let out = ctx.heap.alloc_vec(t, 1)?;
    let heap = &ctx.heap;
    match t {
        Tag::Bit => bits_mut(heap, out)[0] = core::bit_get(v) as u64,
        Tag::Byte => u8s_mut(heap, out)[0] = core::byte_get(v),
        Tag::Int => i32s_mut(heap, out)[0] = core::int_get(v),
        Tag::Sym => u32s_mut(heap, out)[0] = core::sym_get(v),
        Tag::Float => f32s_mut(heap, out)[0] = core::float_get(v),
        Tag::Mixed => unreachable!(),
    }
    Ok(out)
}

fn randf(ctx: &mut Ctx, v: Val) -> Result<Val, ErrCode> {
    if core::boxed_p(v) {
        return Err(ErrCode::Rank);
    }
    if core::tag(v) != Tag::Int {
        return Err(ErrCode::Type);
    }
    let n = core::int_get(v);
    if n < 0 {
        return Err(ErrCode::Domain);
    }
    let out = ctx.heap.alloc_vec(Tag::Float, n as usize)?;
    // seeded on first use
    let rng = ctx.rng.get_or_insert_with(Prng::seeded);
    rng.fill(f32s_mut(&ctx.heap, out));
    Ok(out)
}

fn type_sym(v: Val) -> Val {
    let name: &[u8] = match core::tag(v) {
        Tag::Bit => b"b",
        Tag::Byte => b"c",
        Tag::Int => b"i",
        Tag::Sym => b"s",
        Tag::Float => b"f",
        Tag::Mixed => b"m",
    };
    core::atom_sym(core::pack_sym(name))
}

fn diagonal(ctx: &mut Ctx, v: Val) -> Result<Val, ErrCode> {
    if !core::matrix_p(v) {
        return Err(ErrCode::Rank);
    }
    let t = core::tag(v);
    let d = core::rows(v).min(core::cols(v));
    let stride = 1usize << core::stride_log(v);
    let out = ctx.heap.alloc_vec(t, d)?;
    let heap = &ctx.heap;
    match t {
        Tag::Int => permute::diag(i32s_mut(heap, out), i32s(heap, v), stride),
        Tag::Float => permute::diag(f32s_mut(heap, out), f32s(heap, v), stride),
        Tag::Byte => permute::diag(u8s_mut(heap, out), u8s(heap, v), stride),
        Tag::Sym => permute::diag(u32s_mut(heap, out), u32s(heap, v), stride),
        Tag::Bit => {
            let src = bits(heap, v);
            pack_bits(bits_mut(heap, out), d, |i| bit_at(src, i * stride + i));
        }
        Tag::Mixed => {
            ctx.heap.release(out);
            return Err(ErrCode::Type);
        }
    }
    Ok(out)
}

fn flip(ctx: &mut Ctx, v: Val) -> Result<Val, ErrCode> {
    if !core::matrix_p(v) {
        return ctx.heap.retain(v);
    }
    let t = core::tag(v);
    let (u, c) = (core::rows(v), core::cols(v));
    let ss = 1usize << core::stride_log(v);
    let out = ctx.heap.alloc_mat(t, c, u)?;
    let ds = 1usize << core::stride_log(out);
    let heap = &ctx.heap;
    match t {
        // the 64-by-64 bit block runs the Eklundh butterfly in place
        Tag::Bit if u == 64 && c == 64 => {
            let src = bits(heap, v);
            let mut blk = [0u64; 64];
            blk.copy_from_slice(&src[..64]);
            permute::transpose64_bits(&mut blk);
            bits_mut(heap, out)[..64].copy_from_slice(&blk);
        }
        Tag::Bit => permute::transpose_strided_bits(bits_mut(heap, out), bits(heap, v), u, c, ss, ds),
        Tag::Int if u == 16 && c == 16 => {
            permute::transpose16_i32(i32s_mut(heap, out), i32s(heap, v), ss, ds)
        }
        Tag::Int => permute::transpose_strided(i32s_mut(heap, out), i32s(heap, v), u, c, ss, ds),
        Tag::Float => permute::transpose_strided(f32s_mut(heap, out), f32s(heap, v), u, c, ss, ds),
        Tag::Byte => permute::transpose_strided(u8s_mut(heap, out), u8s(heap, v), u, c, ss, ds),
        Tag::Sym => permute::transpose_strided(u32s_mut(heap, out), u32s(heap, v), u, c, ss, ds),
        Tag::Mixed => {
            ctx.heap.release(out);
            return Err(ErrCode::Type);
        }
    }
    Ok(out)
}

fn count_verb(ctx: &mut Ctx, v: Val) -> Result<Val, ErrCode> {
    let _ = ctx;
    Ok(core::atom_int(core::count(v) as i32))
}

// ---- reductions ----

fn reduce_verb(ctx: &mut Ctx, verb: u8, v: Val) -> Result<Val, ErrCode> {
    if !core::boxed_p(v) {
        if !numeric_p(core::tag(v)) {
            return Err(ErrCode::Type);
        }
        return ctx.heap.retain(v);
    }
    let t = core::tag(v);
    if !numeric_p(t) {
        return Err(ErrCode::Type);
    }

    // matrices reduce row by row over the logical columns
    let row_spans: Vec<(usize, usize)> = if core::matrix_p(v) {
        let stride = 1usize << core::stride_log(v);
        (0..core::rows(v))
            .map(|r| (r * stride, core::cols(v)))
            .collect()
    } else {
        vec![(0, core::count(v))]
    };

    let heap = &ctx.heap;
    let pool = &ctx.pool;
    match (verb, t) {
        (V_SUMR, Tag::Bit) => {
            let mut s = 0i32;
            for &(o, n) in &row_spans {
                let w = bits(heap, v);
                for i in o..o + n {
                    s += bit_at(w, i) as i32;
                }
            }
            Ok(core::atom_int(s))
        }
        (V_SUMR, Tag::Byte) => {
            let a = u8s(heap, v);
            let mut s = 0i32;
            for &(o, n) in &row_spans {
                s = s.wrapping_add(reduce::sum_u8(&a[o..o + n]));
            }
            Ok(core::atom_int(s))
        }
        (V_SUMR, Tag::Int) => {
            let a = i32s(heap, v);
            if row_spans.len() == 1 {
                let (o, n) = row_spans[0];
                Ok(core::atom_int(par_reduce_i32(
                    pool,
                    &a[o..o + n],
                    reduce::sum_i32,
                    0,
                    |x, y| x.wrapping_add(y),
                )))
            } else {
                let mut s = 0i32;
                for &(o, n) in &row_spans {
                    s = s.wrapping_add(reduce::sum_i32(&a[o..o + n]));
                }
                Ok(core::atom_int(s))
            }
        }
        (V_SUMR, Tag::Float) => {
            let a = f32s(heap, v);
            if row_spans.len() == 1 {
                let (o, n) = row_spans[0];
                Ok(core::atom_float(par_reduce_f32(
                    pool,
                    &a[o..o + n],
                    reduce::sum_f32,
                    0.0,
                    |x, y| x + y,
                )))
            } else {
                let mut s = 0.0f32;
                for &(o, n) in &row_spans {
                    s += reduce::sum_f32(&a[o..o + n]);
                }
                Ok(core::atom_float(s))
            }
        }
        (V_MAXR, Tag::Bit) => {
            let w = bits(heap, v);
            let mut any = false;
            for &(o, n) in &row_spans {
                for i in o..o + n {
                    any |= bit_at(w, i);
                }
            }
            Ok(core::atom_bit(any))
        }
        (V_MINR, Tag::Bit) => {
            let w = bits(heap, v);
            let mut all = true;
            for &(o, n) in &row_spans {
                for i in o..o + n {
                    all &= bit_at(w, i);
                }
            }
            Ok(core::atom_bit(all))
        }
        (V_MAXR, Tag::Byte) => {
            let a = u8s(heap, v);
            let mut s = u8::MIN;
            for &(o, n) in &row_spans {
                s = s.max(reduce::max_u8(&a[o..o + n]));
            }
            Ok(core::atom_byte(s))
        }
        (V_MINR, Tag::Byte) => {
            let a = u8s(heap, v);
            let mut s = u8::MAX;
            for &(o, n) in &row_spans {
                s = s.min(reduce::min_u8(&a[o..o + n]));
            }
            Ok(core::atom_byte(s))
        }
        (V_MAXR, Tag::Int) => {
            let a = i32s(heap, v);
            if row_spans.len() == 1 {
                let (o, n) = row_spans[0];
                Ok(core::atom_int(par_reduce_i32(
                    pool,
                    &a[o..o + n],
                    reduce::max_i32,
                    i32::MIN,
                    |x, y| x.max(y),
                )))
            } else {
                let mut s = i32::MIN;
                for &(o, n) in &row_spans {
                    s = s.max(reduce::max_i32(&a[o..o + n]));
                }
                Ok(core::atom_int(s))
            }
        }
        (V_MINR, Tag::Int) => {
            let a = i32s(heap, v);
            let mut s = i32::MAX;
            for &(o, n) in &row_spans {
                s = s.min(reduce::min_i32(&a[o..o + n]));
            }
            Ok(core::atom_int(s))
        }
        (V_MAXR, Tag::Float) => {
            let a = f32s(heap, v);
            if row_spans.len() == 1 {
                let (o, n) = row_spans[0];
                Ok(core::atom_float(par_reduce_f32(
                    pool,
                    &a[o..o + n],
                    reduce::max_f32,
                    f32::NEG_INFINITY,
                    |x, y| x.max(y),
                )))
            } else {
                let mut s = f32::NEG_INFINITY;
                for &(o, n) in &row_spans {
                    s = s.max(reduce::max_f32(&a[o..o + n]));
                }
                Ok(core::atom_float(s))
            }
        }
        (V_MINR, Tag::Float) => {
            let a = f32s(heap, v);
            let mut s = f32::INFINITY;
            for &(o, n) in &row_spans {
                s = s.min(reduce::min_f32(&a[o..o + n]));
            }
            Ok(core::atom_float(s))
        }
        _ => Err(ErrCode::Type),
    }
}

fn par_reduce_i32(
    pool: &workers::WorkerPool,
    a: &[i32],
    kern: fn(&[i32]) -> i32,
    ident: i32,
    fold: fn(i32, i32) -> i32,
) -> i32 {
    let mut partials = [ident; MAX_WAYS];
    let sp = RedSpan {
        src: a.as_ptr() as usize,
        out: partials.as_mut_ptr() as usize,
        kern,
    };
    pool.run_split(
        workers::par_red::<i32>,
        &sp as *const _ as usize,
        a.len(),
        pool.grain(),
    );
    partials.iter().fold(ident, |s, &p| fold(s, p))
}

fn par_reduce_f32(
    pool: &workers::WorkerPool,
    a: &[f32],
    kern: fn(&[f32]) -> f32,
    ident: f32,
    fold: fn(f32, f32) -> f32,
) -> f32 {
    let mut partials = [ident; MAX_WAYS];
    let sp = RedSpan {
        src: a.as_ptr() as usize,
        out: partials.as_mut_ptr() as usize,
        kern,
    };
    pool.run_split(
        workers::par_red::<f32>,
        &sp as *const _ as usize,
        a.len(),
        pool.grain(),
    );
    partials.iter().fold(ident, |s, &p| fold(s, p))
}

// ---- normalisation ----

fn row_float_verb(ctx: &mut Ctx, v: Val, kern: fn(&mut [f32], &[f32])) -> Result<Val, ErrCode> {
    let c = convert(ctx, v, Tag::Float)?;
    if !core::boxed_p(c) {
        let mut d = [0.0f32];
        kern(&mut d, &[core::float_get(c)]);
        return Ok(core::atom_float(d[0]));
    }
    let out = match alloc_like(ctx, Tag::Float, c) {
        Ok(o) => o,
        Err(e) => {
            ctx.heap.release(c);
            return Err(e);
        }
    };
    let heap = &ctx.heap;
    if core::matrix_p(c) {
        let sp = RowSpan {
            dst: heap.base(out) as usize,
            src: heap.base(c) as usize,
            cols: core::cols(c),
            stride: 1usize << core::stride_log(c),
            kern,
        };
        // rows split over the pool, serial below eight rows
        ctx.pool
            .run_split(workers::par_rows, &sp as *const _ as usize, core::rows(c), 8);
    } else {
        kern(f32s_mut(heap, out), f32s(heap, c));
    }
    ctx.heap.release(c);
    Ok(out)
}

// ---- structural dyads ----

/// Element at logical index i of any rank-1 array, as an unowned atom
/// or element word
pub(crate) fn elem_at(heap: &Heap, v: Val, i: usize) -> Val {
    match core::tag(v) {
        Tag::Bit => core::atom_bit(bit_at(bits(heap, v), i)),
        Tag::Byte => core::atom_byte(u8s(heap, v)[i]),
        Tag::Int => core::atom_int(i32s(heap, v)[i]),
        Tag::Sym => core::atom_sym(u32s(heap, v)[i]),
        Tag::Float => core::atom_float(f32s(heap, v)[i]),
        Tag::Mixed => vals(heap, v)[i],
    }
}

/// Writes an element word into a fresh array of matching tag
fn elem_set(heap: &Heap, out: Val, i: usize, e: Val) {
    match core::tag(out) {
        Tag::Bit => {
            if core::bit_get(e) {
                bits_mut(heap, out)[i >> 6] |= 1u64 << (i & 63);
            }
        }
        Tag::Byte => u8s_mut(heap, out)[i] = core::byte_get(e),
        Tag::Int => i32s_mut(heap, out)[i] = core::int_get(e),
        Tag::Sym => u32s_mut(heap, out)[i] = core::sym_get(e),
        Tag::Float => f32s_mut(heap, out)[i] = core::float_get(e),
        Tag::Mixed => vals_mut(heap, out)[i] = e,
    }
}

fn take(ctx: &mut Ctx, l: Val, r: Val) -> Result<Val, ErrCode> {
    // a two-element left operand reshapes into a matrix
    if core::boxed_p(l) {
        if core::tag(l) == Tag::Int && core::count(l) == 2 && !core::matrix_p(l) {
            let (u, c) = {
                let s = i32s(&ctx.heap, l);
                (s[0], s[1])
            };
            return reshape_mat(ctx, u, c, r);
        }
        return Err(ErrCode::Rank);
    }
    if core::tag(l) != Tag::Int {
        return Err(ErrCode::Type);
    }
    if core::matrix_p(r) {
        return Err(ErrCode::Rank);
    }

    let n = core::int_get(l);
    let len = core::count(r);
    let total = n.unsigned_abs() as usize;
    // cycling an empty source is undefined
    if total > 0 && len == 0 {
        return Err(ErrCode::Domain);
    }

    let t = core::tag(r);
    let out = ctx.heap.alloc_vec(t, total)?;
    // negative counts take from the tail
    let start = if n >= 0 { 0 } else { (len - total % len) % len };
    let heap = &ctx.heap;
    for i in 0..total {
        let e = if core::boxed_p(r) {
            elem_at(heap, r, (start + i) % len)
        } else {
            r
        };
        elem_set(heap, out, i, e);
    }
    if t == Tag::Mixed {
        for i in 0..total {
            let e = vals(&ctx.heap, out)[i];
            ctx.heap.retain(e)?;
        }
    }
    Ok(out)
}

fn reshape_mat(ctx: &mut Ctx, u: i32, c: i32, r: Val) -> Result<Val, ErrCode> {
    if u <= 0 || c <= 0 {
        return Err(ErrCode::Domain);
    }
    if core::matrix_p(r) || core::tag(r) == Tag::Mixed {
        return Err(ErrCode::Type);
    }
    let len = core::count(r);
    if core::boxed_p(r) && len == 0 {
        return Err(ErrCode::Domain);
    }
    let (u, c) = (u as usize, c as usize);
    let t = core::tag(r);
    let out = ctx.heap.alloc_mat(t, u, c)?;
    let stride = 1usize << core::stride_log(out);
    let heap = &ctx.heap;
    for row in 0..u {
        for col in 0..c {
            let e = if core::boxed_p(r) {
                elem_at(heap, r, (row * c + col) % len)
            } else {
                r
            };
            elem_set(heap, out, row * stride + col, e);
        }
    }
    Ok(out)
}

fn drop_verb(ctx: &mut Ctx, l: Val, r: Val) -> Result<Val, ErrCode> {
    if core::boxed_p(l) || core::tag(l) != Tag::Int {
        return Err(ErrCode::Type);
    }
    if !core::boxed_p(r) || core::matrix_p(r) {
        return Err(ErrCode::Rank);
    }
    let n = core::int_get(l);
    let len = core::count(r);
    let keep = len.saturating_sub(n.unsigned_abs() as usize);
    let start = if n >= 0 { len - keep } else { 0 };
    let t = core::tag(r);
    let out = ctx.heap.alloc_vec(t, keep)?;
    let heap = &ctx.heap;
    for i in 0..keep {
        elem_set(heap, out, i, elem_at(heap, r, start + i));
    }
    if t == Tag::Mixed {
        for i in 0..keep {
            let e = vals(&ctx.heap, out)[i];
            ctx.heap.retain(e)?;
        }
    }
    Ok(out)
}

fn concat(ctx: &mut Ctx, l: Val, r: Val) -> Result<Val, ErrCode> {
    if core::matrix_p(l) || core::matrix_p(r) {
        return Err(ErrCode::Rank);
    }
    let (lt, rt) = (core::tag(l), core::tag(r));
    let (ln, rn) = (core::count(l), core::count(r));
    let total = ln + rn;

    let out_tag = if lt == rt {
        lt
    } else if numeric_p(lt) && numeric_p(rt) {
        promote(lt, rt)?
    } else {
        Tag::Mixed
    };

    if out_tag == Tag::Mixed {
        let out = ctx.heap.alloc_vec(Tag::Mixed, total)?;
        for i in 0..total {
            let (src, j) = if i < ln { (l, i) } else { (r, i - ln) };
            let e = if core::boxed_p(src) {
                elem_at(&ctx.heap, src, j)
            } else {
                src
            };
            let e = ctx.heap.retain(e)?;
            vals_mut(&ctx.heap, out)[i] = e;
        }
        return Ok(out);
    }

    let lc = convert(ctx, l, out_tag)?;
    let rc = match convert(ctx, r, out_tag) {
        Ok(v) => v,
        Err(e) => {
            ctx.heap.release(lc);
            return Err(e);
        }
    };
    let out = match ctx.heap.alloc_vec(out_tag, total) {
        Ok(v) => v,
        Err(e) => {
            ctx.heap.release(lc);
            ctx.heap.release(rc);
            return Err(e);
        }
    };
    let heap = &ctx.heap;
    for i in 0..total {
        let (src, j) = if i < ln { (lc, i) } else { (rc, i - ln) };
        let e = if core::boxed_p(src) {
            elem_at(heap, src, j)
        } else {
            src
        };
        elem_set(heap, out, i, e);
    }
    ctx.heap.release(lc);
    ctx.heap.release(rc);
    Ok(out)
}

/// Bounds-checked gather; an atom index extracts an atom
pub fn index(ctx: &mut Ctx, l: Val, r: Val) -> Result<Val, ErrCode> {
    if !core::boxed_p(l) {
        return Err(ErrCode::Rank);
    }
    if core::matrix_p(l) {
        return Err(ErrCode::Nyi);
    }
    let idx = convert(ctx, r, Tag::Int)?;
    let len = core::count(l);
    let t = core::tag(l);

    if !core::boxed_p(idx) {
        let i = core::int_get(idx);
        if i < 0 || i as usize >= len {
            return Err(ErrCode::Index);
        }
        let e = elem_at(&ctx.heap, l, i as usize);
        return if t == Tag::Mixed {
            ctx.heap.retain(e)
        } else {
            Ok(e)
        };
    }
    if core::matrix_p(idx) {
        ctx.heap.release(idx);
        return Err(ErrCode::Rank);
    }

    let out = match ctx.heap.alloc_vec(t, core::count(idx)) {
        Ok(v) => v,
        Err(e) => {
            ctx.heap.release(idx);
            return Err(e);
        }
    };
    let heap = &ctx.heap;
    let iv = i32s(heap, idx);
    let res = match t {
        Tag::Bit => permute::gather_bits(bits_mut(heap, out), bits(heap, l), len, iv),
        Tag::Byte => permute::gather(u8s_mut(heap, out), u8s(heap, l), iv),
        Tag::Int => permute::gather(i32s_mut(heap, out), i32s(heap, l), iv),
        Tag::Sym => permute::gather(u32s_mut(heap, out), u32s(heap, l), iv),
        Tag::Float => permute::gather(f32s_mut(heap, out), f32s(heap, l), iv),
        Tag::Mixed => permute::gather(vals_mut(heap, out), vals(heap, l), iv),
    };
    ctx.heap.release(idx);
    match res {
        Ok(()) => {
            if t == Tag::Mixed {
                for i in 0..core::count(out) {
                    let e = vals(&ctx.heap, out)[i];
                    ctx.heap.retain(e)?;
                }
            }
            Ok(out)
        }
        Err(e) => {
            // gathered elements were never retained, so drop the
            // array without releasing them
            if t == Tag::Mixed {
                for x in vals_mut(&ctx.heap, out).iter_mut() {
                    *x = core::NONE;
                }
            }
            ctx.heap.release(out);
            Err(e)
        }
    }
}

fn cast(ctx: &mut Ctx, l: Val, r: Val) -> Result<Val, ErrCode> {
    if core::boxed_p(l) || core::tag(l) != Tag::Sym {
        return Err(ErrCode::Type);
    }
    let to = match core::unpack_sym(core::sym_get(l)).as_slice() {
        b"b" => Tag::Bit,
        b"c" => Tag::Byte,
        b"i" => Tag::Int,
        b"f" => Tag::Float,
        _ => return Err(ErrCode::Domain),
    };
    convert(ctx, r, to)
}

/// Dot selects by shape: dot product, matrix-vector, vector-matrix
/// or matrix-matrix; operands must be float
fn dot(ctx: &mut Ctx, l: Val, r: Val) -> Result<Val, ErrCode> {
    if core::tag(l) != Tag::Float || core::tag(r) != Tag::Float {
        return Err(ErrCode::Type);
    }
    if !core::boxed_p(l) || !core::boxed_p(r) {
        return Err(ErrCode::Rank);
    }
    let heap_rows = |v: Val| if core::matrix_p(v) { core::rows(v) } else { 0 };

    match (heap_rows(l), heap_rows(r)) {
        (0, 0) => {
            if core::count(l) != core::count(r) {
                return Err(ErrCode::Length);
            }
            let heap = &ctx.heap;
            Ok(core::atom_float(reduce::dot_f32(
                f32s(heap, l),
                f32s(heap, r),
            )))
        }
        (m, 0) => {
            if core::cols(l) != core::count(r) {
                return Err(ErrCode::Rank);
            }
            let out = ctx.heap.alloc_vec(Tag::Float, m)?;
            let heap = &ctx.heap;
            matmul::mv_f32(
                f32s_mut(heap, out),
                f32s(heap, l),
                f32s(heap, r),
                0..m,
                core::cols(l),
                1 << core::stride_log(l),
            );
            Ok(out)
        }
        (0, k) => {
            if core::count(l) != k {
                return Err(ErrCode::Rank);
            }
            let n = core::cols(r);
            let out = ctx.heap.alloc_vec(Tag::Float, n)?;
            let heap = &ctx.heap;
            matmul::vm_f32(
                f32s_mut(heap, out),
                f32s(heap, l),
                f32s(heap, r),
                k,
                n,
                1 << core::stride_log(r),
            );
            Ok(out)
        }
        (m, k) => {
            if core::cols(l) != k {
                return Err(ErrCode::Rank);
            }
            let n = core::cols(r);
            let out = ctx.heap.alloc_mat(Tag::Float, m, n)?;
            let heap = &ctx.heap;
            let sp = MatSpan {
                c: heap.base(out) as usize,
                a: heap.base(l) as usize,
                b: heap.base(r) as usize,
                rows: m,
                k,
                n,
                sa: 1 << core::stride_log(l),
                sb: 1 << core::stride_log(r),
                sc: 1 << core::stride_log(out),
            };
            // rows split over the pool, serial below eight rows
            ctx.pool
                .run_split(workers::par_mm, &sp as *const _ as usize, m, 8);
            Ok(out)
        }
    }
}

// ---- entry ----

/// Applies a verb to its operands. Operands are borrowed; the result
/// is a fresh owned reference.
pub fn dispatch(ctx: &mut Ctx, verb: u8, left: Option<Val>, right: Val) -> Result<Val, ErrCode> {
    match left {
        None => match verb {
            V_ADD => flip(ctx, right),
            V_SUB => negate(ctx, right),
            V_MUL => absval(ctx, right),
            V_DIV | V_EXP | V_SQRT => float_unary(ctx, right, verb),
            V_MOD => enumerate(ctx, right),
            V_MIN => where_(ctx, right),
            V_MAX => reverse(ctx, right),
            V_LESS => grade(ctx, right, false),
            V_MORE => grade(ctx, right, true),
            V_NOT => not(ctx, right),
            V_CAT => enlist(ctx, right),
            V_SHAPE => count_verb(ctx, right),
            V_CUT => convert(ctx, right, Tag::Int),
            V_RAND => randf(ctx, right),
            V_AT => Ok(type_sym(right)),
            V_DOT => diagonal(ctx, right),
            V_CAST => convert(ctx, right, Tag::Float),
            V_SUMR | V_MAXR | V_MINR => reduce_verb(ctx, verb, right),
            V_RMS => row_float_verb(ctx, right, reduce::rms_norm),
            V_SMAX => row_float_verb(ctx, right, reduce::softmax),
            _ => Err(ErrCode::Nyi),
        },
        Some(l) => match verb {
            V_ADD => bin_elementwise(ctx, BinOp::Add, l, right),
            V_SUB => bin_elementwise(ctx, BinOp::Sub, l, right),
            V_MUL => bin_elementwise(ctx, BinOp::Mul, l, right),
            V_DIV => bin_elementwise(ctx, BinOp::Div, l, right),
            V_MOD => modulo(ctx, l, right),
            V_MIN => bin_elementwise(ctx, BinOp::Min, l, right),
            V_MAX => bin_elementwise(ctx, BinOp::Max, l, right),
            V_LESS => bin_elementwise(ctx, BinOp::Lt, l, right),
            V_MORE => bin_elementwise(ctx, BinOp::Gt, l, right),
            V_EQ => bin_elementwise(ctx, BinOp::Eq, l, right),
            V_CAT => concat(ctx, l, right),
            V_SHAPE => take(ctx, l, right),
            V_CUT => drop_verb(ctx, l, right),
            V_AT => index(ctx, l, right),
            V_DOT => dot(ctx, l, right),
            V_CAST => cast(ctx, l, right),
            _ => Err(ErrCode::Nyi),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Ctx {
        Ctx::new(1)
    }

    fn int_vec(ctx: &mut Ctx, xs: &[i32]) -> Val {
        let v = ctx.heap.alloc_vec(Tag::Int, xs.len()).unwrap();
        i32s_mut(&ctx.heap, v).copy_from_slice(xs);
        v
    }

    fn float_vec(ctx: &mut Ctx, xs: &[f32]) -> Val {
        let v = ctx.heap.alloc_vec(Tag::Float, xs.len()).unwrap();
        f32s_mut(&ctx.heap, v).copy_from_slice(xs);
        v
    }

    #[test]
    fn scalar_broadcast_both_sides() {
        let mut c = ctx();
        let a = int_vec(&mut c, &[1, 2, 3]);
        let s = core::atom_int(10);
        let r1 = dispatch(&mut c, V_ADD, Some(s), a).unwrap();
        let r2 = dispatch(&mut c, V_ADD, Some(a), s).unwrap();
        assert_eq!(i32s(&c.heap, r1), &[11, 12, 13]);
        assert_eq!(i32s(&c.heap, r2), &[11, 12, 13]);
        for v in [a, r1, r2] {
            c.heap.release(v);
        }
        assert!(c.heap.quiescent());
    }

    #[test]
    fn promotion_widens() {
        let mut c = ctx();
        let a = int_vec(&mut c, &[1, 2]);
        let f = core::atom_float(0.5);
        let r = dispatch(&mut c, V_ADD, Some(a), f).unwrap();
        assert_eq!(core::tag(r), Tag::Float);
        assert_eq!(f32s(&c.heap, r), &[1.5, 2.5]);
        c.heap.release(a);
        c.heap.release(r);
        assert!(c.heap.quiescent());
    }

    #[test]
    fn divide_always_floats() {
        let mut c = ctx();
        let r = dispatch(&mut c, V_DIV, Some(core::atom_int(3)), core::atom_int(2)).unwrap();
        assert_eq!(core::float_get(r), 1.5);
    }

    #[test]
    fn comparisons_produce_bits() {
        let mut c = ctx();
        let a = int_vec(&mut c, &[1, 5, 3]);
        let r = dispatch(&mut c, V_LESS, Some(a), core::atom_int(4)).unwrap();
        assert_eq!(core::tag(r), Tag::Bit);
        let w = bits(&c.heap, r);
        assert!(bit_at(w, 0) && !bit_at(w, 1) && bit_at(w, 2));
        c.heap.release(a);
        c.heap.release(r);
        assert!(c.heap.quiescent());
    }

    #[test]
    fn length_mismatch() {
        let mut c = ctx();
        let a = int_vec(&mut c, &[1, 2, 3]);
        let b = int_vec(&mut c, &[1, 2]);
        assert_eq!(dispatch(&mut c, V_ADD, Some(a), b), Err(ErrCode::Length));
        c.heap.release(a);
        c.heap.release(b);
        assert!(c.heap.quiescent());
    }

    #[test]
    fn enum_and_sum() {
        let mut c = ctx();
        let e = dispatch(&mut c, V_MOD, None, core::atom_int(10)).unwrap();
        assert_eq!(i32s(&c.heap, e), (0..10).collect::<Vec<_>>().as_slice());
        let s = dispatch(&mut c, V_SUMR, None, e).unwrap();
        assert_eq!(core::int_get(s), 45);
        c.heap.release(e);
        assert!(c.heap.quiescent());
    }

    #[test]
    fn sum_of_empty_is_zero() {
        let mut c = ctx();
        let e = dispatch(&mut c, V_MOD, None, core::atom_int(0)).unwrap();
        let s = dispatch(&mut c, V_SUMR, None, e).unwrap();
        assert_eq!(s, core::atom_int(0));
        c.heap.release(e);
        assert!(c.heap.quiescent());
    }

    #[test]
    fn reverse_twice_is_identity() {
        let mut c = ctx();
        let a = int_vec(&mut c, &[5, 6, 7, 8]);
        let r1 = dispatch(&mut c, V_MAX, None, a).unwrap();
        let r2 = dispatch(&mut c, V_MAX, None, r1).unwrap();
        assert_eq!(i32s(&c.heap, r2), i32s(&c.heap, a));
        assert_eq!(i32s(&c.heap, r1), &[8, 7, 6, 5]);
        for v in [a, r1, r2] {
            c.heap.release(v);
        }
        assert!(c.heap.quiescent());
    }

    #[test]
    fn index_bounds() {
        let mut c = ctx();
        let a = int_vec(&mut c, &[10, 20, 30]);
        let i = int_vec(&mut c, &[2, 0]);
        let r = dispatch(&mut c, V_AT, Some(a), i).unwrap();
        assert_eq!(i32s(&c.heap, r), &[30, 10]);
        let bad = int_vec(&mut c, &[3]);
        assert_eq!(dispatch(&mut c, V_AT, Some(a), bad), Err(ErrCode::Index));
        let atom = dispatch(&mut c, V_AT, Some(a), core::atom_int(1)).unwrap();
        assert_eq!(core::int_get(atom), 20);
        for v in [a, i, r, bad] {
            c.heap.release(v);
        }
        assert!(c.heap.quiescent());
    }

    #[test]
    fn concat_bytes_stays_bytes() {
        let mut c = ctx();
        let a = c.heap.alloc_vec(Tag::Byte, 3).unwrap();
        u8s_mut(&c.heap, a).copy_from_slice(b"abc");
        let b = c.heap.alloc_vec(Tag::Byte, 2).unwrap();
        u8s_mut(&c.heap, b).copy_from_slice(b"de");
        let r = dispatch(&mut c, V_CAT, Some(a), b).unwrap();
        assert_eq!(core::tag(r), Tag::Byte);
        assert_eq!(u8s(&c.heap, r), b"abcde");
        for v in [a, b, r] {
            c.heap.release(v);
        }
        assert!(c.heap.quiescent());
    }

    #[test]
    fn concat_mismatched_tags_goes_mixed() {
        let mut c = ctx();
        let a = int_vec(&mut c, &[1]);
        let s = core::atom_sym(core::pack_sym(b"ab"));
        let r = dispatch(&mut c, V_CAT, Some(a), s).unwrap();
        assert_eq!(core::tag(r), Tag::Mixed);
        assert_eq!(core::count(r), 2);
        c.heap.release(a);
        c.heap.release(r);
        assert!(c.heap.quiescent());
    }

    #[test]
    fn reshape_and_flip() {
        let mut c = ctx();
        let shape = int_vec(&mut c, &[2, 3]);
        let src = int_vec(&mut c, &[1, 2, 3, 4, 5, 6]);
        let m = dispatch(&mut c, V_SHAPE, Some(shape), src).unwrap();
        assert!(core::matrix_p(m));
        assert_eq!((core::rows(m), core::cols(m)), (2, 3));
        let t = dispatch(&mut c, V_ADD, None, m).unwrap();
        assert_eq!((core::rows(t), core::cols(t)), (3, 2));
        let d = dispatch(&mut c, V_DOT, None, t).unwrap();
        assert_eq!(i32s(&c.heap, d), &[1, 5]);
        for v in [shape, src, m, t, d] {
            c.heap.release(v);
        }
        assert!(c.heap.quiescent());
    }

    #[test]
    fn matmul_shapes() {
        let mut c = ctx();
        let shape = int_vec(&mut c, &[2, 2]);
        let src = float_vec(&mut c, &[1.0, 2.0, 3.0, 4.0]);
        let m = dispatch(&mut c, V_SHAPE, Some(shape), src).unwrap();
        let mm = dispatch(&mut c, V_DOT, Some(m), m).unwrap();
        assert!(core::matrix_p(mm));
        let hv = f32s(&c.heap, mm);
        let st = 1usize << core::stride_log(mm);
        assert_eq!(
            [hv[0], hv[1], hv[st], hv[st + 1]],
            [7.0, 10.0, 15.0, 22.0]
        );
        let v = float_vec(&mut c, &[1.0, 1.0]);
        let mv = dispatch(&mut c, V_DOT, Some(m), v).unwrap();
        assert_eq!(f32s(&c.heap, mv), &[3.0, 7.0]);
        let vm = dispatch(&mut c, V_DOT, Some(v), m).unwrap();
        assert_eq!(f32s(&c.heap, vm), &[4.0, 6.0]);
        let dd = dispatch(&mut c, V_DOT, Some(v), v).unwrap();
        assert_eq!(core::float_get(dd), 2.0);
        let bad = dispatch(&mut c, V_DOT, Some(m), src);
        assert_eq!(bad, Err(ErrCode::Rank));
        let iv = int_vec(&mut c, &[1, 2]);
        assert_eq!(dispatch(&mut c, V_DOT, Some(iv), iv), Err(ErrCode::Type));
        for x in [shape, src, m, mm, v, mv, vm, iv] {
            c.heap.release(x);
        }
        assert!(c.heap.quiescent());
    }

    #[test]
    fn cast_by_symbol() {
        let mut c = ctx();
        let a = int_vec(&mut c, &[0, 1, 2]);
        let r = dispatch(
            &mut c,
            V_CAST,
            Some(core::atom_sym(core::pack_sym(b"b"))),
            a,
        )
        .unwrap();
        assert_eq!(core::tag(r), Tag::Bit);
        let w = bits(&c.heap, r);
        assert!(!bit_at(w, 0) && bit_at(w, 1) && bit_at(w, 2));
        c.heap.release(a);
        c.heap.release(r);
        assert!(c.heap.quiescent());
    }

    #[test]
    fn where_counts() {
        let mut c = ctx();
        let a = int_vec(&mut c, &[0, 3, 0, 7]);
        let b = dispatch(&mut c, V_NOT, None, a).unwrap();
        let nb = dispatch(&mut c, V_NOT, None, b).unwrap();
        let w = dispatch(&mut c, V_MIN, None, nb).unwrap();
        assert_eq!(i32s(&c.heap, w), &[1, 3]);
        for v in [a, b, nb, w] {
            c.heap.release(v);
        }
        assert!(c.heap.quiescent());
    }

    #[test]
    fn softmax_rows() {
        let mut c = ctx();
        let shape = int_vec(&mut c, &[2, 4]);
        let src = float_vec(&mut c, &[1.0, 2.0, 3.0, 4.0, 4.0, 3.0, 2.0, 1.0]);
        let m = dispatch(&mut c, V_SHAPE, Some(shape), src).unwrap();
        let s = dispatch(&mut c, V_SMAX, None, m).unwrap();
        let hv = f32s(&c.heap, s);
        let st = 1usize << core::stride_log(s);
        let row0: f32 = hv[..4].iter().sum();
        let row1: f32 = hv[st..st + 4].iter().sum();
        assert!((row0 - 1.0).abs() < 1e-5 && (row1 - 1.0).abs() < 1e-5);
        for v in [shape, src, m, s] {
            c.heap.release(v);
        }
        assert!(c.heap.quiescent());
    }

    #[test]
    fn modulo_dispatch() {
        let mut c = ctx();
        let a = int_vec(&mut c, &[10, 11, 12]);
        let r = dispatch(&mut c, V_MOD, Some(a), core::atom_int(3)).unwrap();
        assert_eq!(i32s(&c.heap, r), &[1, 2, 0]);
        assert_eq!(
            dispatch(&mut c, V_MOD, Some(a), core::atom_int(0)),
            Err(ErrCode::Domain)
        );
        assert_eq!(
            dispatch(&mut c, V_MOD, Some(a), core::atom_float(2.0)),
            Err(ErrCode::Type)
        );
        c.heap.release(a);
        c.heap.release(r);
        assert!(c.heap.quiescent());
    }
}
