// RANKLE, an interpreter for a terse array language.

// SPDX-FileCopyrightText: © 2026 The Rankle contributors
// SPDX-License-Identifier: AGPL-3.0-only

// Rankle is licensed under the terms of the GNU Affero General Public
// License version 3. See the top level LICENSE file for the license
// text.

// <>

// src/print.rs

// Display formatting. Arrays list horizontally with truncation,
// printable strings show verbatim, matrices print one row per line,
// mixed arrays recurse. Floats use the power-of-ten table and a
// five-significant-digit rule with scientific notation outside a
// narrow range.

// <>

use crate::core::{self, Atom, Tag, Val};
use crate::verbs::{elem_at, u8s};
use crate::Ctx;

/// Display width cap per line
const MAX_LINE: usize = 191;

/// The forty powers of ten consulted by the float formatter
static POW10: [f64; 40] = [
    1e-20, 1e-19, 1e-18, 1e-17, 1e-16, 1e-15, 1e-14, 1e-13, 1e-12, 1e-11, 1e-10, 1e-9, 1e-8,
    1e-7, 1e-6, 1e-5, 1e-4, 1e-3, 1e-2, 1e-1, 1e0, 1e1, 1e2, 1e3, 1e4, 1e5, 1e6, 1e7, 1e8, 1e9,
    1e10, 1e11, 1e12, 1e13, 1e14, 1e15, 1e16, 1e17, 1e18, 1e19,
];

fn trunc(mut s: String) -> String {
    if s.len() > MAX_LINE {
        s.truncate(MAX_LINE);
        s.push_str("..");
    }
    s
}

#[inline(always)]
fn printable(b: u8) -> bool {
    (0x20..=0x7E).contains(&b)
}

/// Five significant digits; scientific notation outside [1e-5, 1e10)
pub fn fmt_float(x: f32) -> String {
    if x.is_nan() {
        return "0n".into();
    }
    if x == f32::INFINITY {
        return "0w".into();
    }
    if x == f32::NEG_INFINITY {
        return "-0w".into();
    }
    if x == 0.0 {
        return "0".into();
    }

    let neg = x < 0.0;
    let mut m = (x as f64).abs();
    let mut e: i32 = 0;
    // bring the mantissa into table range, then locate its decade
    while m >= 1e19 {
        m /= 1e19;
        e += 19;
    }
    while m < 1.0 {
        m *= 1e19;
        e -= 19;
    }
    let k = POW10.iter().rposition(|&p| p <= m).unwrap();
    e += k as i32 - 20;
    m /= POW10[k];

    let mut d = (m * 1e4).round() as u64;
    if d >= 100000 {
        d = 10000;
        e += 1;
    }
    if d < 10000 {
        d *= 10;
        e -= 1;
    }
    let digits = d.to_string();

    let mut out = String::new();
    if neg {
        out.push('-');
    }
    if (-5..=9).contains(&e) {
        if e >= 4 {
            out.push_str(&digits);
            for _ in 0..(e - 4) {
                out.push('0');
            }
        } else if e >= 0 {
            let (ip, fp) = digits.split_at(e as usize + 1);
            out.push_str(ip);
            let fp = fp.trim_end_matches('0');
            if !fp.is_empty() {
                out.push('.');
                out.push_str(fp);
            }
        } else {
            out.push_str("0.");
            for _ in 0..(-e - 1) {
                out.push('0');
            }
            out.push_str(digits.trim_end_matches('0'));
        }
    } else {
        let (ip, fp) = digits.split_at(1);
        out.push_str(ip);
        let fp = fp.trim_end_matches('0');
        if !fp.is_empty() {
            out.push('.');
            out.push_str(fp);
        }
        out.push('e');
        out.push_str(&e.to_string());
    }
    out
}

fn atom_string(a: Atom) -> String {
    match a {
        Atom::Bit(b) => if b { "1" } else { "0" }.into(),
        Atom::Byte(b) if printable(b) => (b as char).to_string(),
        Atom::Byte(b) => b.to_string(),
        Atom::Int(i) => i.to_string(),
        Atom::Sym(s) => {
            let mut out = String::from("`");
            out.push_str(&String::from_utf8_lossy(&core::unpack_sym(s)));
            out
        }
        Atom::Float(f) => fmt_float(f),
    }
}

/// One logical row of a rank-1 array or matrix
fn row_string(ctx: &Ctx, v: Val, offset: usize, n: usize) -> String {
    let heap = &ctx.heap;
    if core::tag(v) == Tag::Byte {
        let s = &u8s(heap, v)[offset..offset + n];
        if !s.is_empty() && s.iter().all(|&b| printable(b)) {
            return String::from_utf8_lossy(s).into_owned();
        }
    }
    let mut out = String::new();
    for i in 0..n {
        if i > 0 {
            out.push(' ');
        }
        if out.len() > MAX_LINE {
            break;
        }
        let e = elem_at(heap, v, offset + i);
        out.push_str(&atom_string(core::atom_view(e).unwrap_or(Atom::Int(0))));
    }
    out
}

/// Renders any value for display
pub fn render(ctx: &Ctx, v: Val) -> String {
    if !core::boxed_p(v) {
        return trunc(atom_string(core::atom_view(v).unwrap()));
    }
    match core::tag(v) {
        Tag::Mixed => {
            let n = core::count(v);
            let mut lines = Vec::with_capacity(n);
            for i in 0..n {
                let e = elem_at(&ctx.heap, v, i);
                lines.push(render(ctx, e));
            }
            lines.join("\n")
        }
        _ if core::matrix_p(v) => {
            let stride = 1usize << core::stride_log(v);
            let cols = core::cols(v);
            (0..core::rows(v))
                .map(|r| trunc(row_string(ctx, v, r * stride, cols)))
                .collect::<Vec<_>>()
                .join("\n")
        }
        _ => trunc(row_string(ctx, v, 0, core::count(v))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_formats() {
        assert_eq!(fmt_float(0.0), "0");
        assert_eq!(fmt_float(0.5), "0.5");
        assert_eq!(fmt_float(3.0), "3");
        assert_eq!(fmt_float(45.0), "45");
        assert_eq!(fmt_float(1234.5), "1234.5");
        assert_eq!(fmt_float(-2.25), "-2.25");
        assert_eq!(fmt_float(0.001), "0.001");
        assert_eq!(fmt_float(1e12), "1e12");
        assert_eq!(fmt_float(1.5e-7), "1.5e-7");
        assert_eq!(fmt_float(f32::INFINITY), "0w");
        assert_eq!(fmt_float(f32::NEG_INFINITY), "-0w");
        assert_eq!(fmt_float(f32::NAN), "0n");
    }

    #[test]
    fn five_significant_digits() {
        assert_eq!(fmt_float(123456789.0), "123460000");
        assert_eq!(fmt_float(1.23456), "1.2346");
    }

    #[test]
    fn renders_values() {
        let mut c = Ctx::new(1);
        crate::parser::compile_line(&mut c, "1 2 3").unwrap();
        let (v, _) = crate::eval::run_scope(&mut c, crate::TOP_SCOPE)
            .unwrap()
            .unwrap();
        assert_eq!(render(&c, v), "1 2 3");
        c.heap.release(v);

        assert_eq!(render(&c, core::atom_int(-7)), "-7");
        assert_eq!(render(&c, core::atom_bit(true)), "1");
        assert_eq!(
            render(&c, core::atom_sym(core::pack_sym(b"ab"))),
            "`ab"
        );
    }

    #[test]
    fn strings_verbatim() {
        let mut c = Ctx::new(1);
        crate::parser::compile_line(&mut c, "\"abc\",\"de\"").unwrap();
        let (v, _) = crate::eval::run_scope(&mut c, crate::TOP_SCOPE)
            .unwrap()
            .unwrap();
        assert_eq!(render(&c, v), "abcde");
        c.heap.release(v);
    }

    #[test]
    fn long_lines_truncate() {
        let mut c = Ctx::new(1);
        crate::parser::compile_line(&mut c, "!200").unwrap();
        let (v, _) = crate::eval::run_scope(&mut c, crate::TOP_SCOPE)
            .unwrap()
            .unwrap();
        let s = render(&c, v);
        assert!(s.ends_with(".."));
        assert!(s.len() <= MAX_LINE + 3);
        c.heap.release(v);
    }

    #[test]
    fn matrix_rows() {
        let mut c = Ctx::new(1);
        crate::parser::compile_line(&mut c, "2 3#!6").unwrap();
        let (v, _) = crate::eval::run_scope(&mut c, crate::TOP_SCOPE)
            .unwrap()
            .unwrap();
        assert_eq!(render(&c, v), "0 1 2\n3 4 5");
        c.heap.release(v);
    }
}
