//! Punto de entrada ("driver").
//!
//! Este módulo orquesta las diferentes fases del proceso de
//! compilación y expone una CLI.

use anyhow::{self, bail, Context};
use atomc::{
    codegen,
    error::Diagnostics,
    ir::{self, Atom},
    lex,
    memory::Memory,
    opt::{self, Optimizations},
    parse,
    source::Source,
};
use clap::{self, crate_version, Arg, Command};
use log::info;

use std::{
    fs::{self, File},
    io::{self, Write},
    process,
    str::FromStr,
};

/// Fases a ejecutar.
#[derive(Copy, Clone, Debug)]
enum Mode {
    /// Código fuente a átomos en formato textual.
    Frontend,

    /// Átomos en formato textual a imagen binaria.
    Backend,

    /// Código fuente a imagen binaria.
    Full,

    /// Ejecución en la máquina virtual.
    Vm,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(mode: &str) -> anyhow::Result<Self> {
        match mode {
            "frontend" => Ok(Mode::Frontend),
            "backend" => Ok(Mode::Backend),
            "full" => Ok(Mode::Full),
            "vm" => Ok(Mode::Vm),
            _ => bail!("Unknown mode: {}", mode),
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Parsing de CLI
    let args = Command::new("atomc")
        .version(crate_version!())
        .about("Compiles programs to accumulator machine images")
        .arg(
            Arg::new("input")
                .required(true)
                .value_name("INPUT")
                .help("Source file, or atom listing for the backend"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .takes_value(true)
                .required(true)
                .value_name("FILE")
                .help("Output file ('-' along with frontend mode for stdout)"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .takes_value(true)
                .value_name("MODE")
                .default_value("full")
                .possible_values(["frontend", "backend", "full", "vm"])
                .help("Compiler stages to run"),
        )
        .arg(
            Arg::new("global")
                .short('g')
                .long("global")
                .help("Remove unreachable code and dead branches"),
        )
        .arg(
            Arg::new("local")
                .short('l')
                .long("local")
                .help("Apply peephole optimizations to machine code"),
        )
        .arg(
            Arg::new("dump")
                .short('d')
                .long("dump")
                .help("Print atoms and a program listing to stdout"),
        )
        .get_matches();

    // Se extraen argumentos necesarios
    let input = args.value_of("input").context("No input file")?;
    let output = args.value_of("output").context("No output file")?;
    let mode = Mode::from_str(args.value_of("mode").unwrap_or("full"))?;
    let dump = args.is_present("dump");

    let mut optimizations = Optimizations::empty();
    if args.is_present("global") {
        optimizations |= Optimizations::GLOBAL;
    }

    if args.is_present("local") {
        optimizations |= Optimizations::LOCAL;
    }

    if let Mode::Vm = mode {
        bail!("The virtual machine is not implemented");
    }

    let text = fs::read_to_string(input)
        .with_context(|| format!("Failed to read input file: {}", input))?;

    let mut atoms = match mode {
        Mode::Backend => ir::read_atoms(&text)
            .with_context(|| format!("Malformed atom listing: {}", input))?,

        Mode::Frontend | Mode::Full | Mode::Vm => match front_end(input, text) {
            Ok(atoms) => atoms,
            Err(diagnostics) => {
                eprint!("{}", diagnostics);
                process::exit(1);
            }
        },
    };

    if optimizations.contains(Optimizations::GLOBAL) {
        opt::optimize(&mut atoms);
    }

    if dump {
        ir::write_atoms(&atoms, &mut io::stdout()).context("Failed to dump atoms")?;
    }

    if let Mode::Frontend = mode {
        return write_atoms(&atoms, output);
    }

    let memory = codegen::emit(&atoms, optimizations).context("Code generation failed")?;
    if dump {
        print!("{}", memory.listing());
    }

    write_image(&memory, output)
}

fn front_end(name: &str, text: String) -> Result<Vec<Atom>, Diagnostics> {
    let source = Source::new(name, text);
    let tokens = lex::tokenize(&source)?;
    let atoms = parse::parse(tokens.iter(), source.start())
        .map_err(|error| Diagnostics::from(error).kind("syntax error"))?;

    Ok(atoms)
}

fn write_atoms(atoms: &[Atom], output: &str) -> anyhow::Result<()> {
    match output {
        "-" => {
            let mut stdout = io::stdout();
            ir::write_atoms(atoms, &mut stdout).context("Failed to write to stdout")
        }

        path => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to open for writing: {}", path))?;

            ir::write_atoms(atoms, &mut file)
                .with_context(|| format!("Failed to write atoms to file: {}", path))
        }
    }
}

fn write_image(memory: &Memory, output: &str) -> anyhow::Result<()> {
    if output == "-" {
        bail!("Refusing to write a binary image to stdout");
    }

    let image = memory.encode();
    let mut file =
        File::create(output).with_context(|| format!("Failed to open for writing: {}", output))?;

    file.write_all(&image)
        .with_context(|| format!("Failed to write image to file: {}", output))?;

    info!("Wrote {} bytes to {}", image.len(), output);
    Ok(())
}
