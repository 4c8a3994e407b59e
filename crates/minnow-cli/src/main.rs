use std::{env, fs, process::ExitCode};

use minnow::{Config, Vm};

const USAGE: &str = "usage: minnow [--dump] <script.mn>";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut dump = false;
    let mut path: Option<&str> = None;
    for arg in &args {
        match arg.as_str() {
            "--dump" => dump = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                return ExitCode::SUCCESS;
            }
            other if other.starts_with('-') => {
                eprintln!("unknown option '{other}'\n{USAGE}");
                return ExitCode::FAILURE;
            }
            other => path = Some(other),
        }
    }
    let Some(path) = path else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };

    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read '{path}': {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut vm = Vm::new(Config::default());
    let script = match vm.compile(path, &source) {
        Ok(script) => script,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if dump {
        let heap = vm.heap();
        let record = heap.script(script);
        let body = heap.function(record.body());
        if let Some(code) = body.code() {
            print!("{}", code.disassemble(heap, script, "<body>"));
        }
        for (index, &func_id) in record.functions().iter().enumerate() {
            let name_id = record.function_names().get(index as u32);
            let name = heap.string(name_id).as_str().to_string();
            if let Some(code) = heap.function(func_id).code() {
                print!("{}", code.disassemble(heap, script, &name));
            }
        }
    }

    ExitCode::SUCCESS
}
