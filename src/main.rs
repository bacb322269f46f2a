use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, IsTerminal};
use std::panic;
use std::process;
use tracing::{debug, info};
use zeta::builtinops::get_builtin_ops;
use zeta::reader::{BufReadSource, LineSource, ReadMode, Reader, StrSource};
use zeta::{Environment, Error, Value, eval};

const USAGE: &str = "usage: zeta [--library PATH] [--quiet] [FILE...]";

/// Library loaded before anything else when `--library` is not given
const LIBRARY_ENV: &str = "ZETA_LIBRARY";

struct Options {
    library: Option<String>,
    quiet: bool,
    files: Vec<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options {
        library: None,
        quiet: false,
        files: Vec::new(),
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--library" | "-l" => match args.next() {
                Some(path) => options.library = Some(path),
                None => return Err("--library requires a path".to_owned()),
            },
            "--quiet" | "-q" => options.quiet = true,
            "--help" | "-h" => return Err(USAGE.to_owned()),
            flag if flag.starts_with('-') && flag.len() > 1 => {
                return Err(format!("unknown option: {flag}\n{USAGE}"));
            }
            _ => options.files.push(arg),
        }
    }
    if options.library.is_none() {
        options.library = std::env::var(LIBRARY_ENV).ok().filter(|p| !p.is_empty());
    }
    Ok(options)
}

/// Only initialize if RUST_LOG is set
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(io::stderr)
                    .with_target(true)
                    .with_level(true),
            )
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn main() {
    init_tracing();

    let options = match parse_args(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{message}");
            process::exit(2);
        }
    };

    let result = panic::catch_unwind(|| run(&options));
    match result {
        Ok(code) => process::exit(code),
        Err(panic_info) => {
            eprintln!("The interpreter encountered an unexpected error and must exit.");

            if let Some(msg) = panic_info.downcast_ref::<&str>() {
                eprintln!("Error: {msg}");
            } else if let Some(msg) = panic_info.downcast_ref::<String>() {
                eprintln!("Error: {msg}");
            } else {
                eprintln!("Error: Unknown panic occurred");
            }

            process::exit(1);
        }
    }
}

/// Returns the process exit code
fn run(options: &Options) -> i32 {
    let env = Environment::new();

    if let Some(library) = &options.library {
        info!(path = %library, "loading library");
        if let Err(e) = run_file(library, &env) {
            eprintln!("{e}");
            eprintln!("failed to load library {library}");
            return 1;
        }
    }

    if !options.files.is_empty() {
        for path in &options.files {
            if let Err(e) = run_file(path, &env) {
                println!("{e}");
                return 1;
            }
        }
        return 0;
    }

    if io::stdin().is_terminal() {
        run_repl(env, options.quiet);
        0
    } else {
        let stdin = io::stdin().lock();
        let reader = Reader::new(BufReadSource::new(stdin, "<stdin>"), ReadMode::Stream);
        match run_stream(reader, &env) {
            Ok(()) => 0,
            Err(e) => {
                println!("{e}");
                1
            }
        }
    }
}

fn run_file(path: &str, env: &Environment) -> Result<(), Error> {
    debug!(path, "running file");
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, &e))?;
    run_stream(Reader::new(StrSource::new(text), ReadMode::Stream), env)
}

/// Evaluate every form in order, stopping at the first error
fn run_stream<S: LineSource>(mut reader: Reader<S>, env: &Environment) -> Result<(), Error> {
    while let Some(form) = reader.read()? {
        eval(&form, env)?;
    }
    Ok(())
}

/// Line source for the REPL. Handles `:` commands between forms.
struct ReplSource {
    editor: DefaultEditor,
    env: Environment,
}

impl LineSource for ReplSource {
    fn next_line(&mut self, continuation: bool) -> Result<Option<String>, Error> {
        loop {
            let prompt = if continuation { "...> " } else { "[]> " };
            let line = match self.editor.readline(prompt) {
                Ok(line) => line,
                Err(ReadlineError::Eof | ReadlineError::Interrupted) => return Ok(None),
                Err(err) => {
                    return Err(Error::IoError {
                        path: "<terminal>".to_owned(),
                        message: err.to_string(),
                    });
                }
            };

            let trimmed = line.trim();
            if !trimmed.is_empty() {
                let _ = self.editor.add_history_entry(trimmed);
            }

            if !continuation {
                match trimmed {
                    "" => continue,
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(&self.env);
                        continue;
                    }
                    ":quit" | ":exit" => return Ok(None),
                    _ => {}
                }
            }
            return Ok(Some(line));
        }
    }
}

fn run_repl(env: Environment, quiet: bool) {
    if !quiet {
        println!("zeta Lisp interpreter");
        println!("Type :help for commands, (help) for the operator list, Ctrl+D to exit.");
        println!();
    }

    env.register_builtin_function("help", |_args| {
        print_operators();
        Ok(zeta::ast::nil())
    });

    let editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Could not initialize the line editor: {err}");
            return;
        }
    };
    let source = ReplSource {
        editor,
        env: env.clone(),
    };
    let mut reader = Reader::new(source, ReadMode::Interactive);

    loop {
        match reader.read() {
            Ok(Some(form)) => match eval(&form, &env) {
                Ok(value) => println!("Value: {value}"),
                Err(e) => println!("{e}"),
            },
            Ok(None) => break,
            Err(e) => println!("{e}"),
        }
    }
    if !quiet {
        println!("Goodbye!");
    }
}

fn print_help() {
    println!("Commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  Ctrl+D     - Exit the interpreter");
    println!();
    println!("A line ending in '\\' closes every open bracket.");
    println!();
    println!("Special forms:");
    println!("  QUOTE LAMBDA LET IF COND BEGIN OR AND DEFINE DELETE LOAD");
    println!();
    println!("Examples:");
    println!("  (define (square x) (* x x))");
    println!("  (square 12)");
    println!("  (let ((x 2) (y 3)) (+ x y))");
    println!("  (load \"library.lisp\")");
    println!();
}

fn print_operators() {
    let (accessors, regular): (Vec<&str>, Vec<&str>) = get_builtin_ops()
        .iter()
        .map(|op| op.name.as_str())
        .partition(|name| name.len() > 3 && name.starts_with('C') && name.ends_with('R'));

    println!("Builtin functions/operators:");
    print_columns(&regular);
    println!("CAR/CDR variants:");
    print_columns(&accessors);
}

fn print_columns(names: &[&str]) {
    const COLUMNS: usize = 6;
    for row in names.chunks(COLUMNS) {
        let line: String = row.iter().map(|name| format!("  {name:<10}")).collect();
        println!("{}", line.trim_end());
    }
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    for (name, value) in bindings {
        match value {
            Value::BuiltinFunction { .. } => println!("  {name} (native)"),
            _ => println!("  {name} = {value}"),
        }
    }
}
