use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use colored::Colorize;

use slsim::command::{self, ENDPOINT_NAME};
use slsim::console::{format_reply, parse_line, ConsoleInput};

fn main() {
    let endpoint: PathBuf = command::endpoint_path(std::path::Path::new("/tmp"), ENDPOINT_NAME);

    println!("{}", "SLS Operator Console".bold());
    println!("Commands: status | go | nogo | abort | throttle <0-100> | quit");

    let stdin = io::stdin();
    let mut transport_failed = false;

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(_) => break,
        }

        let cmd = match parse_line(&line) {
            ConsoleInput::Quit => break,
            ConsoleInput::Empty => continue,
            ConsoleInput::Unknown => {
                println!("Unknown command");
                continue;
            }
            ConsoleInput::Command(cmd) => cmd,
        };

        match command::send_command(&endpoint, cmd) {
            Ok(reply) => println!("{}", format_reply(reply)),
            Err(_) => {
                transport_failed = true;
                println!("{}", "Failed to contact FCC".red());
            }
        }
    }

    std::process::exit(i32::from(transport_failed));
}
