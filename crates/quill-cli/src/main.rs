//! The `quill` binary: runs a script file, or starts an interactive prompt
//! when invoked without arguments.

use std::{
    env, fs,
    io::{self, BufRead, Write},
    process::ExitCode,
};

use quill::{Interpreter, Lexer, Object, parse_source};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    match args.get(1) {
        Some(path) => run_file(path),
        None => repl(),
    }
}

fn run_file(path: &str) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: failed to read '{path}': {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut interp = Interpreter::new();
    match interp.run_source(&source, path) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Interactive prompt. Each line is an independent program; the debug
/// commands `:tokens`, `:ast` and `:dis` dump the pipeline stages.
fn repl() -> ExitCode {
    println!("quill interactive prompt ('exit' to quit, :tokens/:ast/:dis <code> to inspect)");
    let mut interp = Interpreter::new();
    let stdin = io::stdin();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" {
            break;
        }

        if let Some(rest) = line.strip_prefix(":tokens ") {
            dump_tokens(rest);
            continue;
        }
        if let Some(rest) = line.strip_prefix(":ast ") {
            dump_ast(rest);
            continue;
        }
        if let Some(rest) = line.strip_prefix(":dis ") {
            dump_code(rest);
            continue;
        }

        match interp.run_source(line, "<repl>") {
            Ok(Object::Null) => {}
            Ok(result) => println!("{result}"),
            Err(err) => println!("{err}"),
        }
    }
    ExitCode::SUCCESS
}

fn dump_tokens(source: &str) {
    let mut lexer = match Lexer::tokenize(source) {
        Ok(lexer) => lexer,
        Err(err) => {
            println!("{err:?}");
            return;
        }
    };
    while !lexer.is_empty() {
        match lexer.advance() {
            Ok(token) => print!("{token} "),
            Err(err) => {
                println!("{err:?}");
                return;
            }
        }
    }
    println!();
}

fn dump_ast(source: &str) {
    match parse_source(source) {
        Ok(ast) => println!("{ast:#?}"),
        Err(err) => println!("{err}"),
    }
}

fn dump_code(source: &str) {
    let code = parse_source(source).and_then(|ast| Interpreter::compile(&ast));
    match code {
        Ok(code) => print!("{code}"),
        Err(err) => println!("{err}"),
    }
}
