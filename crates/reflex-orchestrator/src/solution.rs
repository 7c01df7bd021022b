//! The structured shape of a generated answer.

use serde::{Deserialize, Serialize};

/// A candidate answer produced by one generator call.
///
/// Split into prose, the import block, and the code body so the import block
/// can be validated on its own before the whole program is executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solution {
    /// Description of the problem and approach.
    pub prefix: String,
    /// Import statements only.
    pub imports: String,
    /// Code body, not including the import statements.
    pub code: String,
}

impl Solution {
    /// Creates a new `Solution`.
    #[must_use]
    pub fn new(
        prefix: impl Into<String>,
        imports: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            imports: imports.into(),
            code: code.into(),
        }
    }

    /// Returns the imports followed by the code as a single program.
    ///
    /// # Examples
    ///
    /// ```
    /// use reflex_orchestrator::Solution;
    ///
    /// let solution = Solution::new("Prints pi", "import math", "print(math.pi)");
    /// assert_eq!(solution.program(), "import math\nprint(math.pi)");
    /// ```
    #[must_use]
    pub fn program(&self) -> String {
        format!("{}\n{}", self.imports, self.code)
    }

    /// Renders the solution as the assistant's turn in the conversation.
    #[must_use]
    pub fn as_attempt_message(&self) -> String {
        format!(
            "Here is my attempt to solve the problem: {} \n Imports: {} \n Code: {}",
            self.prefix, self.imports, self.code
        )
    }
}
