use std::path::Path;

use crate::{Error, Result};

/// Resource usage and exit status of a finished sandbox process,
/// stored as a three-line report file:
///
/// ```text
/// time <milliseconds>
/// memory <bytes>
/// exit_code <integer>
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Report {
    /// Wall-clock time in milliseconds.
    pub time: i64,
    /// Peak memory usage in bytes.
    pub memory: i64,
    /// Exit code; -1 if the process did not exit normally.
    pub exit_code: i32,
}

impl Report {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let data = format!(
            "time {}\nmemory {}\nexit_code {}\n",
            self.time, self.memory, self.exit_code
        );
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self> {
        let mut report = Report::default();
        let mut seen = [false; 3];
        for line in data.lines() {
            let (key, value) = line
                .split_once(' ')
                .ok_or_else(|| Error::InvalidReport(format!("bad line: {:?}", line)))?;
            let parse = |value: &str| {
                value
                    .parse::<i64>()
                    .map_err(|_| Error::InvalidReport(format!("bad value: {:?}", line)))
            };
            match key {
                "time" => {
                    report.time = parse(value)?;
                    seen[0] = true;
                }
                "memory" => {
                    report.memory = parse(value)?;
                    seen[1] = true;
                }
                "exit_code" => {
                    report.exit_code = parse(value)? as i32;
                    seen[2] = true;
                }
                key => {
                    return Err(Error::InvalidReport(format!("unknown key: {:?}", key)))
                }
            }
        }
        if seen != [true; 3] {
            return Err(Error::InvalidReport("missing fields".into()));
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let report = Report::parse("time 1250\nmemory 4096\nexit_code 0\n").unwrap();
        assert_eq!(
            report,
            Report {
                time: 1250,
                memory: 4096,
                exit_code: 0,
            }
        );
        assert!(report.success());

        // Killed processes report a negative exit code.
        let report = Report::parse("time 501\nmemory 67108864\nexit_code -1\n").unwrap();
        assert_eq!(report.exit_code, -1);
        assert!(!report.success());

        assert!(Report::parse("time 1\nmemory 2\n").is_err());
        assert!(Report::parse("time x\nmemory 2\nexit_code 0\n").is_err());
        assert!(Report::parse("time 1\nmemory 2\nexit_code 0\nbogus 4\n").is_err());
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        let report = Report {
            time: 17,
            memory: 123456,
            exit_code: 3,
        };
        report.write(&path).unwrap();
        assert_eq!(Report::read(&path).unwrap(), report);
    }
}
