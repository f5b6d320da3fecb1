use std::io::{BufRead, Write};

use crate::coord::{format_roles, Role, SessionRole};
use crate::core::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Won,
    Lost { ordinal: u32, roles: Vec<Role> },
}

/// `y` (any case) means "I am the slow one"; anything else means no.
pub fn parse_guess(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("y")
}

/// Asks whether this consumer is the SLOW one and scores the answer.
///
/// End of input counts as "no".
pub fn check_outcome<R, W>(
    session: SessionRole,
    roles: &[Role],
    input: &mut R,
    output: &mut W,
) -> Result<Outcome>
where
    R: BufRead + ?Sized,
    W: Write + ?Sized,
{
    write!(output, "Am I the slow consumer? (y/n) ")?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;

    if parse_guess(&line) == session.role.is_slow() {
        writeln!(output, "You won!")?;
        return Ok(Outcome::Won);
    }
    writeln!(output, "Nooooo!!!")?;
    writeln!(output, "My number is {}", session.ordinal)?;
    writeln!(output, "The actual list of consumers is {}", format_roles(roles))?;
    Ok(Outcome::Lost {
        ordinal: session.ordinal,
        roles: roles.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(role: Role, answer: &str) -> (Outcome, String) {
        let session = SessionRole { ordinal: 1, role };
        let roles = [Role::Slow, role];
        let mut out = Vec::new();
        let outcome = check_outcome(session, &roles, &mut answer.as_bytes(), &mut out)
            .expect("check");
        (outcome, String::from_utf8(out).expect("utf8"))
    }

    #[test]
    fn guess_is_case_insensitive() {
        assert!(parse_guess("y\n"));
        assert!(parse_guess("Y"));
        assert!(!parse_guess("yes"));
        assert!(!parse_guess("n"));
        assert!(!parse_guess(""));
    }

    #[test]
    fn correct_slow_guess_wins() {
        let (outcome, out) = play(Role::Slow, "Y\n");
        assert_eq!(outcome, Outcome::Won);
        assert!(out.ends_with("You won!\n"));
    }

    #[test]
    fn correct_fast_guess_wins() {
        assert_eq!(play(Role::Fast, "n\n").0, Outcome::Won);
    }

    #[test]
    fn wrong_guess_reports_ordinal_and_roles() {
        let (outcome, out) = play(Role::Fast, "y\n");
        assert_eq!(
            outcome,
            Outcome::Lost {
                ordinal: 1,
                roles: vec![Role::Slow, Role::Fast]
            }
        );
        assert!(out.contains("My number is 1"));
        assert!(out.contains("[SLOW, FAST]"));
    }

    #[test]
    fn end_of_input_means_no() {
        assert_eq!(play(Role::Fast, "").0, Outcome::Won);
        assert!(matches!(play(Role::Slow, "").0, Outcome::Lost { .. }));
    }
}
