//! This module implements the TTY interactive interface.
//!
//! It is mainly based on two crates:
//!   - rustyline, to handle the line-editting logic
//!   - clap, to handle the parsing of those interactive commands
//!
//! Using Parser to do this is a bit of a hack, and requires some weird options
//! to have it working but works nonetheless.

use std::collections::{BTreeMap, BTreeSet};

use clap::Parser;
use mipsim_emulator::compiler::DebugInfo;
use mipsim_emulator::constants as C;
use mipsim_emulator::runtime::dump::{file_dump, memory_dump, register_dump};
use mipsim_emulator::runtime::{
    Computer, ProcessorError, RegisterName, Stop, DEFAULT_HISTORY_LIMIT,
};
use rustyline::history::DefaultHistory;
use rustyline::{Behavior, CompletionType, Config, EditMode, Editor};
use tracing::{debug, info, warn};

mod helper;
mod parse;
use self::helper::RunHelper;

static HELP: &str = r#"
Run "help [command]" for command-specific help.
An empty line re-runs the last valid command."#;

#[derive(Parser, Clone, Debug)]
#[clap(
    help_template = "{about}\n\nCOMMANDS:\n{subcommands}\n{after-help}",
    after_help = HELP,
    disable_version_flag = true,
    infer_subcommands = true,
    no_binary_name = true,
    allow_negative_numbers = true,
)]
/// Interactive mode commands
enum Command {
    /// Execute the next instructions
    #[command(alias = "s")]
    Step {
        /// Number of steps to execute
        #[clap(value_parser, default_value = "1")]
        number: u64,
    },

    /// Undo the last instructions
    #[command(alias = "r")]
    Reverse {
        /// Number of steps to undo
        #[clap(value_parser, default_value = "1")]
        number: u64,
    },

    /// Exit the simulator
    Exit,

    /// Show the state of registers
    Registers {
        #[clap(value_parser)]
        register: Option<RegisterName>,
    },

    /// Show the content of a block in memory
    Memory {
        /// The address to show. Can be a direct address (number or label) or
        /// an indirect one (register with an optional offset).
        #[clap(value_parser)]
        address: parse::Address,

        /// Number of bytes to show
        #[clap(value_parser, default_value = "16")]
        length: u32,
    },

    /// Set a word in memory or a register
    Set {
        /// The address or register to set
        #[clap(value_parser)]
        target: parse::AssignmentTarget,

        /// The value to set
        #[clap(value_parser)]
        value: parse::Address,
    },

    /// Show the next few instructions
    List {
        /// Number of instructions to show
        #[clap(value_parser, default_value = "10")]
        number: u32,
    },

    /// Set a breakpoint
    Break {
        /// The address where to set the breakpoint
        #[clap(value_parser)]
        address: parse::Address,
    },

    /// Remove a breakpoint
    Unbreak {
        /// The address of the breakpoint to remove
        #[clap(value_parser)]
        address: parse::Address,
    },

    /// Continue the program until the next breakpoint or the end
    #[command(alias = "c")]
    Continue,

    /// Show informations about the current debugging session
    Info {
        #[clap(subcommand)]
        sub: Option<InfoCommand>,
    },
}

#[derive(Parser, Clone, Debug)]
enum InfoCommand {
    /// List active breakpoints
    Breakpoints,

    /// List program labels
    Labels,

    /// Show the number of instructions executed since the beginning of the program
    Count,

    /// List the files opened by the program
    Files,
}

/// Holds informations about a interactive session
#[derive(Debug, Default)]
struct Session<'a> {
    /// Active breakpoints, sorted by address
    breakpoints: BTreeSet<C::Address>,

    /// Map of labels in program
    labels: BTreeMap<String, C::Address>,

    debug_info: Option<&'a DebugInfo>,

    /// Current address for the `list` command
    list_address: Option<C::Address>,
}

impl<'a> Session<'a> {
    fn from_debug_info(info: &'a DebugInfo) -> Self {
        Session {
            labels: info
                .labels
                .iter()
                .map(|(label, address)| (label.clone(), *address))
                .collect(),
            debug_info: Some(info),
            ..Default::default()
        }
    }

    /// Add a breakpoint
    fn add_breakpoint(&mut self, address: C::Address) {
        if self.breakpoints.insert(address) {
            info!("Setting a breakpoint at {address:#010x}");
        } else {
            warn!("A breakpoint was already set at {address:#010x}");
        }
    }

    /// Remove a breakpoint
    fn remove_breakpoint(&mut self, address: C::Address) {
        if self.breakpoints.remove(&address) {
            info!("Removing breakpoint at {address:#010x}");
        } else {
            warn!("No breakpoint was set at {address:#010x}");
        }
    }

    /// Checks if the given address has a breakpoint
    fn has_breakpoint(&self, address: C::Address) -> bool {
        self.breakpoints.contains(&address)
    }

    /// Reset the `list` command (after running an instruction)
    fn reset_list(&mut self) {
        self.list_address = None;
    }

    /// Offset the `list` command, returns the address to show
    fn offset_list(&mut self, computer: &Computer, count: u32) -> C::Address {
        let address = self.list_address.unwrap_or(computer.registers.pc);
        self.list_address =
            Some(address.saturating_add(count.saturating_mul(C::INSTRUCTION_SIZE)));
        address
    }

    /// Display the list of breakpoints
    fn display_breakpoints(&self, computer: &Computer) {
        match self.breakpoints.len() {
            0 => info!("No breakpoints"),
            1 => info!("1 breakpoint:"),
            x => info!("{} breakpoints:", x),
        }

        for address in &self.breakpoints {
            self.display_instruction(computer, *address);
        }
    }

    /// Display an instruction at specified address
    fn display_instruction(&self, computer: &Computer, address: C::Address) {
        // First, display the labels on the line if any
        if let Some(info) = self.debug_info {
            for label in info.labels_at(address) {
                info!("            {}:", label);
            }
        }

        // Then compute what is supposed to show in the gutter
        let is_current_line = computer.registers.pc == address;
        let has_breakpoint = self.has_breakpoint(address);

        let gutter = match (has_breakpoint, is_current_line) {
            (true, true) => "B>",
            (true, false) => "B ",
            (false, true) => " >",
            (false, false) => "  ",
        };

        let line = computer
            .memory
            .line_at(address)
            .map(|line| format!("  (line {line})"))
            .unwrap_or_default();

        if let Some(instruction) = computer.memory.instruction_at(address) {
            info!("{gutter:<2} {address:#010x}    {instruction}{line}");
        } else {
            info!("{gutter:<2} {address:#010x}    -");
        }
    }

    /// Display the list of labels
    fn display_labels(&self) {
        match self.labels.len() {
            0 => info!("No labels"),
            1 => info!("1 label:"),
            x => info!("{} labels:", x),
        }

        for (label, &address) in &self.labels {
            info!("  {label} => {address:#010x}");
        }
    }

    /// Display the number of executed instructions
    fn display_count(computer: &Computer) {
        info!("Instructions: {}", computer.instruction_count);
    }

    fn display_files(computer: &Computer) {
        for line in file_dump(computer.files()).lines() {
            info!("{line}");
        }
    }
}

/// Log why the computer stopped
fn log_stop(error: &ProcessorError) {
    match error {
        ProcessorError::Halt { code } => info!(code, "Program exited"),
        ProcessorError::Fault(fault) => {
            let line = fault.line.map(|line| format!(" (line {line})")).unwrap_or_default();
            warn!("Program faulted: {fault}{line}");
        }
        e => warn!(error = e as &dyn std::error::Error, "Halted"),
    }
}

pub(crate) fn run_interactive(
    computer: &mut Computer,
    debug_info: &DebugInfo,
) -> anyhow::Result<()> {
    info!("Running in interactive mode. Type \"help\" to list available commands.");
    let config = Config::builder()
        .history_ignore_space(true)
        .completion_type(CompletionType::List)
        .edit_mode(EditMode::Emacs)
        .behavior(Behavior::PreferTerm)
        .auto_add_history(true)
        .build();

    let mut session = Session::from_debug_info(debug_info);
    computer.enable_history(DEFAULT_HISTORY_LIMIT);

    let h: RunHelper<Command> = RunHelper::new(session.labels.keys().cloned().collect());
    let mut rl: Editor<RunHelper<Command>, DefaultHistory> = Editor::with_config(config)?;
    rl.set_helper(Some(h));

    let mut last_command: Option<Command> = None;

    'read: loop {
        // A macro to unwrap an error, log it and continue the loop
        macro_rules! warn_and_continue {
            ($e:expr) => {
                match $e {
                    Ok(o) => o,
                    Err(e) => {
                        tracing::warn!(error = %e);
                        continue 'read;
                    }
                }
            };
        }

        let Ok(readline) = rl.readline(">> ") else {
            info!("EOF, exiting");
            return Ok(());
        };

        let command = if readline.is_empty() {
            if let Some(command) = &last_command {
                command.clone()
            } else {
                info!("Type \"help\" to get the list of available commands");
                continue 'read;
            }
        } else {
            let Ok(words) = shell_words::split(readline.as_str()) else {
                warn!("Invalid input");
                continue 'read;
            };

            let command = warn_and_continue!(Command::try_parse_from(words));
            last_command = Some(command.clone());
            command
        };

        debug!("Executing command: {:?}", command);
        let halted = computer.state().is_terminated();

        match (command, halted) {
            (Command::Exit, _) => break,

            (Command::Step { number }, false) => {
                session.reset_list();

                for _ in 0..number {
                    if let Err(e) = computer.step() {
                        log_stop(&e);
                        continue 'read;
                    }
                }

                session.display_instruction(computer, computer.registers.pc);
            }

            (Command::Reverse { number }, _) => {
                session.reset_list();

                let mut reversed = 0;
                while reversed < number && computer.reverse() {
                    reversed += 1;
                }

                if reversed < number {
                    warn!("Reversed {reversed} instructions, no more history");
                }
                session.display_instruction(computer, computer.registers.pc);
            }

            (Command::Registers { register }, _) => {
                if let Some(name) = register {
                    let value = computer.registers.read(name);
                    info!("{name} = {value} ({:#010x})", value as u32);
                } else {
                    for line in register_dump(&computer.registers).lines() {
                        info!("{line}");
                    }
                }
            }

            (Command::Memory { address, length }, _) => {
                let address = warn_and_continue!(address.evaluate(computer, &session.labels));
                let end = address.saturating_add(length);
                let dump = warn_and_continue!(memory_dump(&computer.memory, address, end));
                for line in dump.lines() {
                    info!("{line}");
                }
            }

            (Command::Set { target, value }, false) => {
                let value = warn_and_continue!(value.evaluate_word(computer, &session.labels));
                match target {
                    parse::AssignmentTarget::Address(address) => {
                        let address =
                            warn_and_continue!(address.evaluate(computer, &session.labels));
                        info!("Setting memory at {address:#010x} to {value}");
                        warn_and_continue!(computer.memory.set_word(address, value));
                    }

                    parse::AssignmentTarget::Register(reg) => {
                        info!("Setting register {reg} to {value}");
                        computer.registers.write(reg, value);
                    }
                }
            }

            (Command::List { number }, _) => {
                let address = session.offset_list(computer, number);
                for i in 0..number {
                    let address = address.saturating_add(i * C::INSTRUCTION_SIZE);
                    session.display_instruction(computer, address);
                }
            }

            (Command::Break { address }, _) => {
                let address = warn_and_continue!(address.evaluate(computer, &session.labels));
                session.add_breakpoint(address);
            }

            (Command::Unbreak { address }, _) => {
                let address = warn_and_continue!(address.evaluate(computer, &session.labels));
                session.remove_breakpoint(address);
            }

            (Command::Continue, false) => {
                session.reset_list();

                // Do not stop on the breakpoint we are standing on
                let mut first = true;
                let breakpoints = &session.breakpoints;
                let result = computer.run_until(|c| {
                    let stop = !first && breakpoints.contains(&c.registers.pc);
                    first = false;
                    stop
                });

                match result {
                    Ok(Stop::Interrupted) => {
                        info!("Stopped at a breakpoint");
                        session.display_instruction(computer, computer.registers.pc);
                    }
                    Ok(Stop::Halted { code }) => info!(code, "Program exited"),
                    Err(e) => log_stop(&e),
                }
            }

            (Command::Info { sub }, _) => match sub {
                Some(InfoCommand::Breakpoints) => session.display_breakpoints(computer),
                Some(InfoCommand::Labels) => session.display_labels(),
                Some(InfoCommand::Count) => Session::display_count(computer),
                Some(InfoCommand::Files) => Session::display_files(computer),
                None => {
                    session.display_breakpoints(computer);
                    info!("-");
                    session.display_labels();
                    info!("-");
                    Session::display_count(computer);
                }
            },

            (_, true) => {
                // Computer is halted but the user asked to continue, we just warn
                warn!("Computer is halted. Use \"exit\" to quit");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use mipsim_emulator::config::Settings;
    use mipsim_emulator::runtime::{BufferedConsole, Reg};
    use mipsim_emulator::{compile, parse};
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse_command(line: &str) -> Command {
        Command::try_parse_from(shell_words::split(line).unwrap()).unwrap()
    }

    #[test]
    fn parse_reverse_test() {
        assert!(matches!(parse_command("r"), Command::Reverse { number: 1 }));
        assert!(matches!(
            parse_command("reverse 3"),
            Command::Reverse { number: 3 }
        ));
        assert!(matches!(parse_command("s 2"), Command::Step { number: 2 }));
        assert!(matches!(
            parse_command("registers"),
            Command::Registers { register: None }
        ));
    }

    #[test]
    fn step_and_reverse_test() {
        let program = parse("main:\n    addi $t0, $zero, 1\n    addi $t0, $t0, 1\n").unwrap();
        let (mut computer, _) = compile(
            &program,
            Settings::default(),
            Box::new(BufferedConsole::new()),
        )
        .unwrap();
        computer.enable_history(DEFAULT_HISTORY_LIMIT);

        computer.run().unwrap();
        assert_eq!(computer.registers.get(Reg::T0), 2);
        assert!(computer.state().is_terminated());

        // Undo the end of the program and the second addition
        assert!(computer.reverse());
        assert!(computer.reverse());
        assert_eq!(computer.registers.get(Reg::T0), 1);
        assert!(!computer.state().is_terminated());

        computer.step().unwrap();
        assert_eq!(computer.registers.get(Reg::T0), 2);
    }
}
