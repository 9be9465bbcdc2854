// RANKLE, an interpreter for a terse array language.

// SPDX-FileCopyrightText: © 2026 The Rankle contributors
// SPDX-License-Identifier: AGPL-3.0-only

// Rankle is licensed under the terms of the GNU Affero General Public
// License version 3. See the top level LICENSE file for the license
// text.

// <>

// src/main.rs

// The outer loop: command line handling, the REPL, and the
// meta-command dispatcher. Everything language-level lives in the
// library; this file only moves lines in and text out.

// <>

use std::io::{BufRead, IsTerminal};
use std::path::Path;
use std::process;

use clap::Parser;
use log::{debug, error};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use rankle::{Ctx, Error};

#[derive(Parser)]
#[command(name = "interp", about = "An interpreter for a terse array language", version)]
struct Cli {
    /// Worker count for large kernels
    #[arg(short = 'n', default_value_t = 1)]
    workers: usize,

    /// Script files, executed in order as if typed
    files: Vec<std::path::PathBuf>,
}

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .env()
        .init()
        .unwrap();

    let cli = Cli::parse();
    let mut ctx = Ctx::new(cli.workers);
    debug!("context up with {} way(s)", ctx.pool.ways());

    for file in &cli.files {
        match run_script(&mut ctx, file) {
            Ok(true) => (),
            Ok(false) => return,
            Err(e) => {
                error!("script {}: {}", file.display(), e);
                process::exit(1);
            }
        }
    }

    repl(&mut ctx);
}

fn repl(ctx: &mut Ctx) {
    if std::io::stdin().is_terminal() {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                error!("line editor: {}", e);
                process::exit(1);
            }
        };
        loop {
            match rl.readline(" ") {
                Ok(line) => {
                    let _ = rl.add_history_entry(line.as_str());
                    if !handle(ctx, &line) {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(e) => {
                    error!("input: {}", e);
                    process::exit(1);
                }
            }
        }
    } else {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if !handle(ctx, &l) {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    }
}

/// One input line; false means quit
fn handle(ctx: &mut Ctx, line: &str) -> bool {
    let line = line.trim_end();
    if line.is_empty() {
        return true;
    }
    if let Some(rest) = line.strip_prefix('\\') {
        return meta(ctx, rest);
    }
    eval_print(ctx, line);
    true
}

fn eval_print(ctx: &mut Ctx, src: &str) {
    match ctx.line(src) {
        Ok(Some(out)) => println!("{}", out),
        Ok(None) => (),
        Err(e) => report(&e),
    }
}

/// Errors print and the loop resumes, except the fatal pair
fn report(e: &Error) {
    if e.fatal() {
        error!("fatal: {}", e);
        process::exit(1);
    }
    println!("{}", e);
}

/// Meta-commands: quit, load, time, workspace, variables, verbs
fn meta(ctx: &mut Ctx, rest: &str) -> bool {
    let (cmd, arg) = match rest.find(' ') {
        Some(i) => (&rest[..i], rest[i + 1..].trim()),
        None => (rest, ""),
    };
    match cmd {
        "q" => return false,
        "l" => {
            if arg.is_empty() {
                println!(" prs");
                return true;
            }
            match run_script(ctx, Path::new(arg)) {
                Ok(cont) => return cont,
                Err(e) => report(&e),
            }
        }
        "t" => {
            // an optional leading integer is the iteration count
            let (iters, expr) = match arg.split_once(' ') {
                Some((n, e)) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => {
                    (n.parse().unwrap_or(1), e.trim())
                }
                _ => (1, arg),
            };
            if expr.is_empty() {
                println!(" prs");
                return true;
            }
            match ctx.time(iters, expr) {
                Ok(ns) => println!("{}", ns),
                Err(e) => report(&e),
            }
        }
        "w" => println!("{}", ctx.workspace_bytes()),
        "v" => println!("{}", ctx.defined_vars()),
        "?" => print!("{}", ctx.verb_help()),
        _ => println!(" prs"),
    }
    true
}

/// Executes a script file line by line; `/` at the start of a line
/// is a comment. Returns false when the script quit.
fn run_script(ctx: &mut Ctx, path: &Path) -> Result<bool, Error> {
    let text = std::fs::read_to_string(path)?;
    debug!("loading {}", path.display());
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('/') {
            continue;
        }
        if !handle(ctx, line) {
            return Ok(false);
        }
    }
    Ok(true)
}
