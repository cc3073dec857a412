//! Choosing one printing out of an ambiguous resolution.

use std::io::{self, BufRead, Write};

use crate::protocol::{CatalogEntry, MatchCandidate, RawRead};

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Chosen(CatalogEntry),
    Skipped,
    /// Stop processing the rest of the run.
    Cancelled,
}

pub trait Disambiguator {
    /// `candidates` are ranked, best first, and never empty.
    fn choose(&mut self, read: &RawRead, candidates: &[MatchCandidate]) -> io::Result<Selection>;
}

/// Batch mode: always takes the top-ranked candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstCandidatePolicy;

impl Disambiguator for FirstCandidatePolicy {
    fn choose(&mut self, _read: &RawRead, candidates: &[MatchCandidate]) -> io::Result<Selection> {
        Ok(candidates
            .first()
            .map(|candidate| Selection::Chosen(candidate.entry.clone()))
            .unwrap_or(Selection::Skipped))
    }
}

/// Numbered terminal prompt. Accepts `1..=N`, `s` to skip; end of input cancels.
pub struct InteractivePrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> InteractivePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn print_candidates(
        &mut self,
        read: &RawRead,
        candidates: &[MatchCandidate],
    ) -> io::Result<()> {
        writeln!(
            self.output,
            "\n'{}' matches {} printings:",
            read.name.trim(),
            candidates.len()
        )?;
        for (index, candidate) in candidates.iter().enumerate() {
            writeln!(
                self.output,
                "  {:>2}. {}  {:.0}%",
                index + 1,
                candidate.entry.display_line(),
                candidate.score * 100.0
            )?;
        }
        Ok(())
    }
}

impl<R: BufRead, W: Write> Disambiguator for InteractivePrompt<R, W> {
    fn choose(&mut self, read: &RawRead, candidates: &[MatchCandidate]) -> io::Result<Selection> {
        if candidates.is_empty() {
            return Ok(Selection::Skipped);
        }
        self.print_candidates(read, candidates)?;

        loop {
            write!(
                self.output,
                "Select printing (1-{}) or 's' to skip: ",
                candidates.len()
            )?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                writeln!(self.output)?;
                return Ok(Selection::Cancelled);
            }
            let answer = line.trim();
            if answer.eq_ignore_ascii_case("s") {
                return Ok(Selection::Skipped);
            }
            match answer.parse::<usize>() {
                Ok(choice) if (1..=candidates.len()).contains(&choice) => {
                    return Ok(Selection::Chosen(candidates[choice - 1].entry.clone()));
                }
                _ => writeln!(self.output, "Invalid choice: {answer:?}")?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{Disambiguator, FirstCandidatePolicy, InteractivePrompt, Selection};
    use crate::backends::test_support::entry;
    use crate::protocol::{MatchCandidate, RawRead};

    fn candidates() -> Vec<MatchCandidate> {
        vec![
            MatchCandidate {
                entry: entry("m10", "m10-146", "Lightning Bolt", "146"),
                score: 1.0,
            },
            MatchCandidate {
                entry: entry("m11", "m11-149", "Lightning Bolt", "149"),
                score: 1.0,
            },
        ]
    }

    fn run_prompt(input: &str) -> (Selection, String) {
        let mut output = Vec::new();
        let selection = {
            let mut prompt = InteractivePrompt::new(Cursor::new(input.as_bytes()), &mut output);
            prompt
                .choose(&RawRead::named("Lightning Bolt"), &candidates())
                .expect("prompt should not fail")
        };
        (selection, String::from_utf8(output).expect("utf8 output"))
    }

    #[test]
    fn test_first_candidate_policy_takes_top_ranked() {
        let selection = FirstCandidatePolicy
            .choose(&RawRead::named("Lightning Bolt"), &candidates())
            .expect("choose");
        assert_eq!(selection, Selection::Chosen(candidates()[0].entry.clone()));
        assert_eq!(
            FirstCandidatePolicy
                .choose(&RawRead::named("x"), &[])
                .expect("choose"),
            Selection::Skipped
        );
    }

    #[test]
    fn test_prompt_lists_printings_and_accepts_number() {
        let (selection, output) = run_prompt("2\n");
        assert_eq!(selection, Selection::Chosen(candidates()[1].entry.clone()));
        assert!(output.contains("matches 2 printings"));
        assert!(output.contains(" 1. M10   #146 "));
        assert!(output.contains(" 2. M11   #149 "));
    }

    #[test]
    fn test_prompt_reprompts_on_invalid_input_then_skips() {
        let (selection, output) = run_prompt("7\nabc\nS\n");
        assert_eq!(selection, Selection::Skipped);
        assert_eq!(output.matches("Invalid choice").count(), 2);
    }

    #[test]
    fn test_prompt_end_of_input_cancels() {
        let (selection, _) = run_prompt("");
        assert_eq!(selection, Selection::Cancelled);
    }
}
