use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use colored::Colorize;
use structopt::StructOpt;

use siskin::{run, Source};

#[derive(StructOpt, Debug)]
#[structopt(name = "siskin", about = "Runs a siskin script, or starts a repl")]
struct Opt {
    /// Script to run; omit to start the repl
    #[structopt(parse(from_os_str))]
    path: Option<PathBuf>,
}

fn main() {
    let opt = Opt::from_args();

    match opt.path {
        Some(path) => script(path),
        None => repl(),
    }
}

fn script(path: PathBuf) {
    let source = match Source::path(&path) {
        Ok(source) => source,
        Err(_) => {
            eprintln!(
                "{} could not read '{}'",
                "Fatal".red().bold(),
                path.display()
            );
            process::exit(1);
        }
    };

    match run(source) {
        Ok(value) => println!("{}", value),
        Err(error) => {
            eprintln!("{}", error);
            process::exit(1);
        }
    }
}

/// Line-at-a-time repl. `.quit` or `.exit` leaves; a lone `...`
/// toggles multi-line mode, evaluating the buffer when it closes.
fn repl() {
    println!("{}", "siskin".green().bold());
    println!("type an expression, `...` for multi-line input, `.quit` to leave");

    let stdin = io::stdin();
    let mut buffer = String::new();
    let mut multiline = false;

    prompt(multiline);
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };

        match line.trim() {
            ".quit" | ".exit" => break,

            "..." if !multiline => multiline = true,

            "..." => {
                multiline = false;
                eval(&buffer);
                buffer.clear();
            }

            _ if multiline => {
                buffer.push_str(&line);
                buffer.push('\n');
            }

            "" => (),

            _ => eval(&line),
        }

        prompt(multiline);
    }
}

fn prompt(multiline: bool) {
    print!("{}", if multiline { "... " } else { ">>> " });
    io::stdout().flush().ok();
}

fn eval(source: &str) {
    match run(Source::source(source)) {
        Ok(value) => println!("{}", value),
        Err(error) => eprintln!("{}", error),
    }
}
