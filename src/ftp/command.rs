use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FtpCommand(&'static str);

impl FtpCommand {
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for FtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

macro_rules! ftp_commands {
    (
        $(
            $(#[$docs:meta])*
            ($konst:ident, $phrase:expr);
        )+
    ) => {
        impl FtpCommand {
        $(
            $(#[$docs])*
            pub const $konst: FtpCommand = FtpCommand($phrase);
        )+
        }
    };
}

ftp_commands! {
    /// pseudo command for the server greeting
    (GREETING, "greeting");
    (AUTH_TLS, "AUTH TLS");
    (PBSZ_0, "PBSZ 0");
    (PROT_P, "PROT P");
    (FEAT, "FEAT");
    (USER, "USER");
    (PASS, "PASS");
    (TYPE_A, "TYPE A");
    (TYPE_I, "TYPE I");
    (MODE_Z, "MODE Z");
    (CWD, "CWD");
    (MKD, "MKD");
    (PASV, "PASV");
    (PORT, "PORT");
    (STOR, "STOR");
    (NOOP, "NOOP");
    (QUIT, "QUIT");
}

/// Render a command line for the debug log, hiding secrets
pub(crate) fn loggable(cmd: FtpCommand, arg: Option<&str>) -> String {
    match arg {
        Some(_) if cmd == FtpCommand::PASS => format!("{cmd} ****"),
        Some(arg) => format!("{cmd} {arg}"),
        None => cmd.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_redacted() {
        assert_eq!(loggable(FtpCommand::PASS, Some("hunter2")), "PASS ****");
        assert_eq!(loggable(FtpCommand::USER, Some("bob")), "USER bob");
        assert_eq!(loggable(FtpCommand::PASV, None), "PASV");
    }
}
