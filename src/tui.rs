//! Terminal output helper macros.
//!
//! All user-facing chatter funnels through these so greppable and accessible
//! modes stay consistent everywhere: greppable silences decorations entirely,
//! accessible keeps the text but drops colour and symbols.

/// A run milestone, shown unless greppable mode is on.
#[macro_export]
macro_rules! output {
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", ::colored::Colorize::green("[>]"), $name);
            }
        }
    };
}

/// Something went wrong but the run continues.
#[macro_export]
macro_rules! warning {
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                eprintln!("{}", $name);
            } else {
                eprintln!("{} {}", ::colored::Colorize::red("[!]"), $name);
            }
        }
    };
}

/// Supporting detail nobody greps for.
#[macro_export]
macro_rules! detail {
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", ::colored::Colorize::blue("[~]"), $name);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn macros_expand_in_every_mode() {
        output!("output", false, false);
        output!("output accessible", false, true);
        output!("output suppressed", true, false);
        warning!("warning", false, false);
        warning!("warning accessible", false, true);
        detail!("detail", false, false);
        detail!(format!("detail {}", 42), false, true);
    }
}
