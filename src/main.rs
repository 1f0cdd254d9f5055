use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::exit;

use anyhow::{anyhow, Result};

use velc::emission::AssemblyFile;
use velc::files::{classify, FileEntry, Report};
use velc::frame::x86_64;
use velc::parser::parse_file;
use velc::symtab::{ModuleMap, SymbolArena};
use velc::translate::{add_global_accesses, translate_file, Accesses};
use velc::typecheck::typecheck;

struct Args {
    inputs: Vec<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut inputs = Vec::new();
        for arg in env::args().skip(1) {
            match arg.as_str() {
                "-h" | "--help" => Self::usage(),
                _ => inputs.push(PathBuf::from(arg)),
            }
        }
        if inputs.is_empty() {
            Self::usage();
        }
        Self { inputs }
    }

    fn usage() -> ! {
        let cmd0 = env::args().next().unwrap_or_else(|| "velc".to_owned());
        print!(
            concat!(
                "Usage: {cmd0} FILE...\n\n",
                "Compiles Vel declaration modules (.vd) and code modules (.vc);\n",
                "each code module produces an assembly file next to it.\n\n",
                "Options:\n",
                "  -h, --help             Show this message\n",
            ),
            cmd0 = cmd0
        );
        exit(0)
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut entries = Vec::new();
    for path in args.inputs {
        let Some(is_code) = classify(&path) else {
            return Err(anyhow!(
                "{}: not a Vel source file (expected .vc or .vd)",
                path.display()
            ));
        };
        if !fs::exists(&path)? {
            return Err(anyhow!("File {} does not exist", path.display()));
        }
        entries.push(FileEntry::new(path, is_code));
    }
    // declaration modules resolve first, in command-line order
    entries.sort_by_key(|e| e.is_code);

    let mut arena = SymbolArena::new();
    let mut modules = ModuleMap::new();
    let mut report = Report::new();
    let mut parsed = Vec::new();

    for mut entry in entries {
        let source = fs::read_to_string(&entry.path)?;
        let ast = parse_file(&source, &mut entry, &modules, &arena, &mut report);
        let checked = ast.map(|mut file| {
            typecheck(&mut file, &mut entry, &mut modules, &mut arena, &mut report);
            file
        });
        parsed.push((entry, checked));
    }

    eprint!("{report}");
    let any_errored = parsed.iter().any(|(entry, _)| entry.errored);

    let mut accesses = Accesses::new();
    for (entry, file) in &parsed {
        if let (false, Some(file)) = (entry.errored, file) {
            add_global_accesses(file, &arena, &mut accesses);
        }
    }
    for (entry, file) in &parsed {
        let (false, true, Some(file)) = (entry.errored, entry.is_code, file.as_ref()) else {
            continue;
        };
        let fragments = translate_file(file, &arena, &mut accesses, x86_64::frame_ctor);
        fs::write(
            entry.assembly_path(),
            AssemblyFile(&fragments).to_string(),
        )?;
    }

    if any_errored {
        exit(1);
    }
    Ok(())
}
