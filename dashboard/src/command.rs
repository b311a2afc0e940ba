//! Dashboard command parsing.

/// One line of dashboard input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Sign in; the password is prompted separately
    Login {
        /// Account email
        email: String,
    },
    /// Sign out
    Logout,
    /// Show who is signed in and until when
    Status,
    /// List plants
    Plants {
        /// Page number (defaults to 1)
        page: Option<u32>,
    },
    /// Count plants
    PlantCount,
    /// Count inverters
    InverterCount,
    /// Production totals of an estate
    EstateTotals {
        /// Estate id
        estate_id: String,
    },
    /// Offline plants of an estate
    Offline {
        /// Estate id
        estate_id: String,
    },
    /// Estate plant listing
    EstatePlants {
        /// Page number (defaults to 1)
        page: Option<u32>,
        /// Page size (defaults to 30)
        page_size: Option<u32>,
    },
    /// Print the command list
    Help,
    /// Leave the dashboard
    Quit,
}

/// Usage text printed by `help`.
pub const HELP: &str = "\
Commands:
  login <email>                 sign in (password is prompted)
  logout                        sign out
  status                        show the current session
  plants [page]                 list plants
  plant-count                   number of plants
  inverter-count                number of inverters
  estate-totals <estate-id>     production totals of an estate
  offline <estate-id>           offline plants of an estate
  estate-plants [page] [size]   estate plant listing
  help                          this text
  quit                          leave";

/// Parse one input line. `Ok(None)` for a blank line.
///
/// # Errors
///
/// Returns a message for the user when the line is not a valid command.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match (name.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("login", [email]) => Command::Login {
            email: (*email).to_string(),
        },
        ("logout", []) => Command::Logout,
        ("status", []) => Command::Status,
        ("plants", rest) if rest.len() <= 1 => Command::Plants {
            page: number(rest.first())?,
        },
        ("plant-count", []) => Command::PlantCount,
        ("inverter-count", []) => Command::InverterCount,
        ("estate-totals", [estate_id]) => Command::EstateTotals {
            estate_id: (*estate_id).to_string(),
        },
        ("offline", [estate_id]) => Command::Offline {
            estate_id: (*estate_id).to_string(),
        },
        ("estate-plants", rest) if rest.len() <= 2 => Command::EstatePlants {
            page: number(rest.first())?,
            page_size: number(rest.get(1))?,
        },
        ("help" | "?", []) => Command::Help,
        ("quit" | "exit", []) => Command::Quit,
        (other, _) => return Err(format!("unknown or malformed command '{other}', try 'help'")),
    };
    Ok(Some(command))
}

fn number(arg: Option<&&str>) -> Result<Option<u32>, String> {
    arg.map(|value| {
        value
            .parse::<u32>()
            .map_err(|_| format!("'{value}' is not a positive number"))
    })
    .transpose()
}
