use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::time::Instant;

use log::{error, info};

use lispmu::eval::{Config, Interp};
use lispmu::primitives;
use lispmu::{CellId, LispResult};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();
    let mut load_files: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--load" => {
                load_files.push(flag_value(&args, i));
                i += 2;
            }
            "--heap" => {
                config.heap_capacity = parse_number(&args, i);
                i += 2;
            }
            "--depth" => {
                config.max_depth = parse_number(&args, i);
                i += 2;
            }
            "--nesting" => {
                config.max_nesting = parse_number(&args, i);
                i += 2;
            }
            "--help" | "-h" => {
                println!("Usage: lispmu [OPTIONS]");
                println!();
                println!("Options:");
                println!("  --load <file>    Evaluate a source file before starting the REPL");
                println!("  --heap <cells>   Heap capacity in cells (default {})", config.heap_capacity);
                println!("  --depth <n>      Maximum evaluation depth (default {})", config.max_depth);
                println!("  --nesting <n>    Maximum list and quote nesting in source (default {})", config.max_nesting);
                println!("  --help, -h       Show this help message");
                println!();
                println!("Environment variables:");
                println!("  RUST_LOG=debug   Log collection and registry activity");
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                eprintln!("Try 'lispmu --help' for usage information.");
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = run(config, &load_files) {
        eprintln!("Fatal: {}", e);
        std::process::exit(1);
    }
}

fn flag_value(args: &[String], i: usize) -> String {
    match args.get(i + 1) {
        Some(value) => value.clone(),
        None => {
            eprintln!("{} requires a value", args[i]);
            std::process::exit(1);
        }
    }
}

fn parse_number(args: &[String], i: usize) -> usize {
    let value = flag_value(args, i);
    match value.parse() {
        Ok(n) => n,
        Err(_) => {
            eprintln!("{} expects a number, got '{}'", args[i], value);
            std::process::exit(1);
        }
    }
}

fn run(config: Config, load_files: &[String]) -> LispResult<()> {
    let mut interp = Interp::with_config(config)?;
    primitives::install(&mut interp)?;

    for path in load_files {
        load_file(&mut interp, path)?;
    }

    if io::stdin().is_terminal() {
        if load_files.is_empty() {
            println!("lispmu");
        } else {
            println!("lispmu (loaded: {})", load_files.join(", "));
        }
        let stats = interp.stats()?;
        println!("  Heap: {} of {} cells in use", stats.live, stats.capacity);
        println!("Ready.\n");
        run_interactive(&mut interp)?;
    } else {
        run_piped(&mut interp)?;
    }

    let freed = interp.cleanup()?;
    info!("released {} cells on exit", freed);
    Ok(())
}

/// Evaluate every form in a file without echoing results.
fn load_file(interp: &mut Interp, path: &str) -> LispResult<()> {
    let input = std::fs::read_to_string(path)?;
    let start = Instant::now();
    let count = eval_forms(&input, interp, |_, _| {})?;
    info!(
        "loaded {} forms from {} in {:.2}s",
        count,
        path,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Read, evaluate and hand each result to `on_value`, one form at a time.
/// Unread text is not on the heap yet, so the collector runs after every
/// form with nothing but the environment to keep alive.
fn eval_forms(
    input: &str,
    interp: &mut Interp,
    mut on_value: impl FnMut(&Interp, CellId),
) -> LispResult<usize> {
    let mut cursor = input;
    let mut count = 0;

    loop {
        let mut reader = interp.reader(cursor);
        if reader.at_end() {
            break;
        }
        let expr = reader.read()?;
        cursor = cursor.get(reader.position()..).unwrap_or("");

        if interp.heap.is_error(expr)? {
            report(interp, expr);
            break;
        }

        let global = interp.global;
        let val = interp.eval(expr, global)?;
        if interp.heap.is_error(val)? {
            report(interp, val);
        } else {
            on_value(interp, val);
        }
        count += 1;
        interp.collect(&[])?;
    }
    Ok(count)
}

fn report(interp: &Interp, err: CellId) {
    let message = match interp.heap.cell(err) {
        Ok(cell) => cell.text().unwrap_or("?").to_string(),
        Err(e) => e.to_string(),
    };
    eprintln!("Error: {}", message);
}

fn print_value(interp: &Interp, val: CellId) {
    println!("{}", interp.render(val));
}

/// Run one chunk of input. Host failures (heap exhausted) abandon the chunk
/// but keep the session alive.
fn eval_and_print(input: &str, interp: &mut Interp) {
    if let Err(e) = eval_forms(input, interp, print_value) {
        error!("evaluation aborted: {}", e);
        eprintln!("Error: {}", e);
        if let Err(e) = interp.collect(&[]) {
            error!("collection failed: {}", e);
        }
    }
}

/// Tracks whether the text typed so far ends inside a list, a string or
/// right after a quote mark.
#[derive(Debug, Default)]
struct Balance {
    depth: i32,
    in_string: bool,
    escaped: bool,
    pending_quote: bool,
}

impl Balance {
    fn feed(&mut self, line: &str) {
        let mut in_comment = false;
        for ch in line.chars() {
            if in_comment {
                break;
            }
            if self.in_string {
                match ch {
                    _ if self.escaped => self.escaped = false,
                    '\\' => self.escaped = true,
                    '"' => self.in_string = false,
                    _ => {}
                }
                continue;
            }
            match ch {
                '(' => {
                    self.depth += 1;
                    self.pending_quote = false;
                }
                ')' => self.depth -= 1,
                '"' => {
                    self.in_string = true;
                    self.pending_quote = false;
                }
                '\'' => self.pending_quote = true,
                ';' => in_comment = true,
                c if c.is_whitespace() => {}
                _ => self.pending_quote = false,
            }
        }
    }

    fn complete(&self) -> bool {
        self.depth <= 0 && !self.in_string && !self.pending_quote
    }
}

/// Interactive REPL: accumulate lines until the input is balanced.
fn run_interactive(interp: &mut Interp) -> LispResult<()> {
    let stdin = io::stdin();
    let mut buf = String::new();
    let mut balance = Balance::default();

    loop {
        if buf.is_empty() {
            print!("> ");
        } else {
            print!("  ");
        }
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        balance.feed(&line);
        buf.push_str(&line);

        if balance.complete() {
            balance = Balance::default();
            let input = std::mem::take(&mut buf);
            if !input.trim().is_empty() {
                eval_and_print(&input, interp);
            }
        }
    }
    Ok(())
}

/// Piped mode: read all input, then evaluate one form at a time.
fn run_piped(interp: &mut Interp) -> LispResult<()> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;
    eval_and_print(&input, interp);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balanced(text: &str) -> bool {
        let mut balance = Balance::default();
        for line in text.split_inclusive('\n') {
            balance.feed(line);
        }
        balance.complete()
    }

    #[test]
    fn balance_tracks_brackets() {
        assert!(balanced("(+ 1 2)\n"));
        assert!(!balanced("(define (f x)\n"));
        assert!(balanced("(define (f x)\n  x)\n"));
    }

    #[test]
    fn balance_ignores_brackets_in_strings_and_comments() {
        assert!(balanced("\"(((\"\n"));
        assert!(!balanced("\"open\n"));
        assert!(balanced("\"a \\\" (\"\n"));
        assert!(balanced("(a) ; (((\n"));
    }

    #[test]
    fn trailing_quote_waits_for_datum() {
        assert!(!balanced("'\n"));
        assert!(balanced("'\nfoo\n"));
        assert!(balanced("'(a b)\n"));
    }

    #[test]
    fn forms_are_collected_between_evaluations() {
        let mut interp = Interp::new().unwrap();
        primitives::install(&mut interp).unwrap();
        let mut seen = Vec::new();
        let count = eval_forms(
            "(define x (list 1 2 3)) (length x) ; done\n",
            &mut interp,
            |interp, val| seen.push(interp.render(val)),
        )
        .unwrap();
        assert_eq!(count, 2);
        assert_eq!(seen, vec!["ok".to_string(), "3".to_string()]);
        assert_eq!(interp.eval_str("x").map(|v| interp.render(v)).unwrap(), "(1 2 3)");
    }

    #[test]
    fn overly_nested_form_stops_the_chunk() {
        let mut interp = Interp::new().unwrap();
        primitives::install(&mut interp).unwrap();
        let input = format!("(define x 1) {} (define x 2)", "(".repeat(100_000));
        let count = eval_forms(&input, &mut interp, |_, _| {}).unwrap();
        assert_eq!(count, 1);
        assert_eq!(interp.eval_str("x").map(|v| interp.render(v)).unwrap(), "1");
    }
}
