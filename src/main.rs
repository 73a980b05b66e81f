use std::env;
use std::path::Path;
use std::process;

use joy_assembler::assembler;
use joy_assembler::logging::error;
use joy_assembler::vm::Vm;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!(
            "Usage: {} <program.joy> [visualize|step|cycles|memory-dump]",
            args[0]
        );
        process::exit(1);
    }

    let mut vm = assembler::assemble_from_file(Path::new(&args[1])).unwrap_or_else(|e| {
        error(e.to_string());
        process::exit(2);
    });

    let mut show_cycles = false;
    match args.get(2).map(String::as_str) {
        None => {}
        Some("visualize") => vm.enable_visualization(),
        Some("step") => vm.enable_stepping(),
        Some("cycles") => show_cycles = true,
        Some("memory-dump") => {
            vm.enable_mock();
            loop {
                vm.memory_dump();
                if !step_or_exit(&mut vm) {
                    break;
                }
            }
            vm.memory_dump();
            return;
        }
        Some(other) => {
            error(format!("unknown commandline argument: {}", other));
            process::exit(1);
        }
    }

    loop {
        vm.visualize();
        if !step_or_exit(&mut vm) {
            break;
        }
    }

    if show_cycles {
        println!("Execution cycles: {}", vm.statistics());
    }
}

/// One VM step; a trap ends the process with a non-zero exit code
fn step_or_exit(vm: &mut Vm) -> bool {
    match vm.step() {
        Ok(keep_running) => keep_running,
        Err(trap) => {
            error(trap.to_string());
            process::exit(1);
        }
    }
}
