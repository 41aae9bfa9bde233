/// Root-to-leaf path encoding.
///
/// A path is a sequence of left/right choices serialized as
/// slash-delimited binary digits ("0/1/1"). The empty string is a valid
/// path: a single-leaf tree's root is the leaf itself.
use std::fmt;
use std::str::FromStr;

use crate::error::CasError;

/// One step of a root-to-leaf walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    /// Child tuple index selected by this step.
    pub fn index(self) -> usize {
        match self {
            Direction::Left => 0,
            Direction::Right => 1,
        }
    }
}

/// A root-to-leaf walk through internal node tuples.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TreePath(Vec<Direction>);

impl TreePath {
    pub fn new(steps: Vec<Direction>) -> Self {
        Self(steps)
    }

    pub fn steps(&self) -> &[Direction] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(match step {
                Direction::Left => "0",
                Direction::Right => "1",
            })?;
        }
        Ok(())
    }
}

impl FromStr for TreePath {
    type Err = CasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::default());
        }

        let steps = s
            .split('/')
            .map(|segment| match segment {
                "0" => Ok(Direction::Left),
                "1" => Ok(Direction::Right),
                other => Err(CasError::InvalidWitness(format!(
                    "Malformed path segment '{other}'"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self(steps))
    }
}
