use std::io::{self, BufRead, Write};

use anyhow::{anyhow, bail, Context, Result};
use common::{AxisId, StageStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect(Option<String>),
    Disconnect,
    Gains {
        axis: AxisId,
        kp: f64,
        ki: f64,
        kd: f64,
        i_lim: f64,
    },
    Targets(Vec<f64>),
    Disable(AxisId),
    Feedback(AxisId),
    FileName(String),
    Save,
    Clear,
    Interval(u64),
    Status,
    Help,
    Quit,
}

pub fn show_menu() {
    println!("\n===========================================");
    println!("Linear Stage Console");
    println!("===========================================");
    println!("connect [port]                 open actuator and sensor");
    println!("disconnect                     close both and idle every axis");
    println!("gains <axis> <kp> <ki> <kd> <i_lim>");
    println!("targets <t0> <t1> ...          set every axis target");
    println!("disable <axis>                 stop driving one axis");
    println!("feedback <axis>                position reported by the motor controller");
    println!("filename <name>                base name for saved series");
    println!("save                           write all series to disk");
    println!("clear                          empty series, restart session clock");
    println!("interval <ms>                  logging interval");
    println!("status                         connection and axis state");
    println!("help | quit");
    println!("===========================================");
}

pub fn prompt() -> io::Result<()> {
    print!("stage> ");
    io::stdout().flush()
}

/// Next non-empty line from stdin, or `None` at end of input.
pub fn read_line(input: &mut impl BufRead) -> io::Result<Option<String>> {
    loop {
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let line = line.trim();
        if !line.is_empty() {
            return Ok(Some(line.to_string()));
        }
    }
}

pub fn parse_command(line: &str) -> Result<Command> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        bail!("empty command");
    };
    let args: Vec<&str> = words.collect();

    let command = match verb.to_ascii_lowercase().as_str() {
        "connect" => {
            expect_at_most(verb, &args, 1)?;
            Command::Connect(args.first().map(|p| p.to_string()))
        }
        "disconnect" => no_args(verb, &args, Command::Disconnect)?,
        "gains" => {
            if args.len() != 5 {
                bail!("usage: gains <axis> <kp> <ki> <kd> <i_lim>");
            }
            Command::Gains {
                axis: parse_arg(args[0], "axis")?,
                kp: parse_arg(args[1], "kp")?,
                ki: parse_arg(args[2], "ki")?,
                kd: parse_arg(args[3], "kd")?,
                i_lim: parse_arg(args[4], "i_lim")?,
            }
        }
        "targets" => {
            if args.is_empty() {
                bail!("usage: targets <t0> <t1> ...");
            }
            let targets = args
                .iter()
                .map(|t| parse_arg(t, "target"))
                .collect::<Result<Vec<f64>>>()?;
            Command::Targets(targets)
        }
        "disable" => {
            let [axis] = args[..] else {
                bail!("usage: disable <axis>");
            };
            Command::Disable(parse_arg(axis, "axis")?)
        }
        "feedback" => {
            let [axis] = args[..] else {
                bail!("usage: feedback <axis>");
            };
            Command::Feedback(parse_arg(axis, "axis")?)
        }
        "filename" => {
            let [name] = args[..] else {
                bail!("usage: filename <name>");
            };
            Command::FileName(name.to_string())
        }
        "save" => no_args(verb, &args, Command::Save)?,
        "clear" => no_args(verb, &args, Command::Clear)?,
        "interval" => {
            let [ms] = args[..] else {
                bail!("usage: interval <ms>");
            };
            Command::Interval(parse_arg(ms, "interval")?)
        }
        "status" => no_args(verb, &args, Command::Status)?,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command '{other}', try 'help'"),
    };
    Ok(command)
}

fn parse_arg<T: std::str::FromStr>(word: &str, what: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    word.parse()
        .with_context(|| format!("invalid {what} '{word}'"))
}

fn no_args(verb: &str, args: &[&str], command: Command) -> Result<Command> {
    expect_at_most(verb, args, 0)?;
    Ok(command)
}

fn expect_at_most(verb: &str, args: &[&str], max: usize) -> Result<()> {
    if args.len() > max {
        return Err(anyhow!("'{verb}' takes at most {max} argument(s)"));
    }
    Ok(())
}

pub fn print_status(status: &StageStatus) {
    println!(
        "sensor: {:?}  actuator: {:?}  session: {}",
        status.sensor,
        status.actuator,
        status
            .session_ms
            .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
            .unwrap_or_else(|| "-".into())
    );
    println!(
        "log: {} every {} ms   ports: {}",
        status.file_name,
        status.log_interval_ms,
        if status.ports.is_empty() {
            "none".to_string()
        } else {
            status.ports.join(", ")
        }
    );
    println!(
        "{:<5} {:<9} {:>10} {:>10} {:>10} {:>8}  gains (kp ki kd i_lim)",
        "axis", "mode", "target", "feedback", "output", "command"
    );
    for axis in &status.axes {
        println!(
            "{:<5} {:<9} {:>10} {:>10} {:>10} {:>8}  {} {} {} {}",
            axis.axis,
            format!("{:?}", axis.mode),
            fmt_opt(axis.target),
            fmt_opt(axis.feedback),
            fmt_opt(axis.output),
            axis.command.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
            axis.gains.kp,
            axis.gains.ki,
            axis.gains.kd,
            axis.gains.i_lim,
        );
    }
    let d = &status.diagnostics;
    println!(
        "ticks: {} control, {} logger   skipped axes: {}   transport errors: {}   rejected: {}",
        d.control_ticks, d.logger_ticks, d.skipped_axes, d.transport_errors, d.rejected_commands
    );
}

fn fmt_opt(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| "-".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operator_commands() {
        assert_eq!(parse_command("connect").unwrap(), Command::Connect(None));
        assert_eq!(
            parse_command("CONNECT /dev/ttyACM0").unwrap(),
            Command::Connect(Some("/dev/ttyACM0".into()))
        );
        assert_eq!(
            parse_command("gains 1 2.5 0 0.1 50").unwrap(),
            Command::Gains {
                axis: 1,
                kp: 2.5,
                ki: 0.0,
                kd: 0.1,
                i_lim: 50.0
            }
        );
        assert_eq!(
            parse_command("targets 10 -3.5").unwrap(),
            Command::Targets(vec![10.0, -3.5])
        );
        assert_eq!(parse_command("interval 250").unwrap(), Command::Interval(250));
        assert_eq!(
            parse_command("filename run7").unwrap(),
            Command::FileName("run7".into())
        );
        assert_eq!(parse_command("feedback 1").unwrap(), Command::Feedback(1));
        assert_eq!(parse_command("quit").unwrap(), Command::Quit);
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(parse_command("gains 0 1 2").is_err());
        assert!(parse_command("targets").is_err());
        assert!(parse_command("targets 1 abc").is_err());
        assert!(parse_command("interval -5").is_err());
        assert!(parse_command("save now").is_err());
        assert!(parse_command("feedback").is_err());
        assert!(parse_command("jump").is_err());
    }

    #[test]
    fn read_line_skips_blank_lines() {
        let mut input = io::Cursor::new("\n  \nstatus\n");
        assert_eq!(read_line(&mut input).unwrap().as_deref(), Some("status"));
        assert_eq!(read_line(&mut input).unwrap(), None);
    }
}
