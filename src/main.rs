use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ruja::bytecode::Bytecode;
use ruja::diagnostic::{Diagnostic, ansi::AnsiRenderer, json};
use ruja::vm::{Vm, VmOptions};
use ruja::{Error, codegen, compiler, lexer, parser};

#[derive(Parser, Debug)]
#[command(name = "ruja", version)]
#[command(about = "Compile and run ruja expressions on a bytecode VM")]
struct Cli {
    /// Source file, or a `.rujac` file written by `--emit bytecode`
    file: Option<PathBuf>,

    /// Inline source text instead of a file
    #[arg(short = 'e', long = "eval", conflicts_with = "file", allow_hyphen_values = true)]
    expr: Option<String>,

    /// Print an intermediate form instead of running
    #[arg(long, value_enum)]
    emit: Option<Emit>,

    /// Output path for `--emit bytecode`
    #[arg(short, long, required_if_eq("emit", "bytecode"))]
    output: Option<PathBuf>,

    /// Stop after this many instructions
    #[arg(long = "max-steps")]
    max_steps: Option<u64>,

    /// Report errors as one-line JSON
    #[arg(long)]
    json: bool,

    /// Disable ANSI colours in error output
    #[arg(long = "no-color")]
    no_color: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// AST as JSON
    Ast,
    /// AST as a Graphviz digraph
    Dot,
    /// Disassembly listing
    Disasm,
    /// Binary bytecode written to `--output`
    Bytecode,
}

enum Input {
    Source { name: String, text: String },
    Compiled { name: String, program: Bytecode },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("RUJA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(d) => {
            if cli.json {
                eprintln!("{}", json::render(&d));
            } else {
                let use_color = !cli.no_color
                    && std::env::var_os("NO_COLOR").is_none()
                    && std::io::stderr().is_terminal();
                eprint!("{}", AnsiRenderer { use_color }.render(&d));
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Diagnostic> {
    let input = read_input(cli)?;

    let (name, program) = match input {
        Input::Compiled { name, program } => {
            if matches!(cli.emit, Some(Emit::Ast | Emit::Dot)) {
                return Err(Diagnostic::error(format!("{name} is compiled bytecode and has no AST"))
                    .with_suggestion("pass the source file instead"));
            }
            (name, program)
        }
        Input::Source { name, text } => {
            let tokens = lexer::lex(&text).map_err(|e| with_source(Error::from(e), &text))?;
            let ast = parser::parse(tokens).map_err(|e| with_source(Error::from(e), &text))?;
            match cli.emit {
                Some(Emit::Ast) => {
                    let out = serde_json::to_string_pretty(&ast)
                        .map_err(|e| Diagnostic::error(format!("cannot serialize AST: {e}")))?;
                    println!("{out}");
                    return Ok(());
                }
                Some(Emit::Dot) => {
                    print!("{}", codegen::dot::render(&ast));
                    return Ok(());
                }
                _ => {}
            }
            let program = compiler::compile(&ast).map_err(|e| with_source(Error::from(e), &text))?;
            (name, program)
        }
    };

    match cli.emit {
        Some(Emit::Disasm) => {
            print!("{}", program.disassemble(&name));
            Ok(())
        }
        Some(Emit::Bytecode) => {
            let Some(path) = &cli.output else {
                return Err(Diagnostic::error("--emit bytecode needs --output"));
            };
            program.save(path).map_err(|e| {
                Diagnostic::error(format!("cannot write {}: {e}", path.display())).with_code("B002")
            })?;
            info!(path = %path.display(), bytes = program.len(), "bytecode written");
            Ok(())
        }
        _ => execute(cli, &program),
    }
}

fn execute(cli: &Cli, program: &Bytecode) -> Result<(), Diagnostic> {
    let options = VmOptions { step_budget: cli.max_steps };
    let mut vm = Vm::with_options(program, options);
    match vm.run() {
        Ok(result) => {
            println!("{}", vm.display(result));
            Ok(())
        }
        Err(e) => {
            let mut d = Diagnostic::from(&e);
            if let Some(line) = e.ip().and_then(|ip| program.line_at(ip)) {
                d = d.with_note(format!("raised by the instruction compiled from line {line}"));
            }
            Err(d)
        }
    }
}

fn read_input(cli: &Cli) -> Result<Input, Diagnostic> {
    if let Some(text) = &cli.expr {
        return Ok(Input::Source { name: "<eval>".to_string(), text: text.clone() });
    }
    let Some(path) = &cli.file else {
        return Err(Diagnostic::error("no input").with_suggestion("pass a FILE or -e EXPR"));
    };
    let name = path.display().to_string();
    if path.extension().is_some_and(|ext| ext == "rujac") {
        debug!(path = %name, "loading bytecode");
        let program = Bytecode::load(path)
            .map_err(|e| Diagnostic::from(&e).with_note(format!("while loading {name}")))?;
        return Ok(Input::Compiled { name, program });
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| Diagnostic::error(format!("cannot read {name}: {e}")))?;
    Ok(Input::Source { name, text })
}

fn with_source(e: Error, source: &str) -> Diagnostic {
    Diagnostic::from(&e).with_source(source)
}
