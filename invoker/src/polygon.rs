//! Reader for the polygon-style `problem.xml` subset the judge needs:
//! test sets with their limits and path patterns, executables (test
//! generators) and the solutions list with the `main` one.

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use xml::attribute::OwnedAttribute;
use xml::reader::{EventReader, XmlEvent};

#[derive(Clone, Debug, Default)]
pub struct FileSource {
    pub path: String,
    /// Source type like `cpp.g++17`; maps to a compiler name.
    pub kind: String,
}

#[derive(Clone, Debug, Default)]
pub struct Executable {
    pub source: Option<FileSource>,
}

#[derive(Clone, Debug, Default)]
pub struct Solution {
    pub tag: String,
    pub source: Option<FileSource>,
}

#[derive(Clone, Debug, Default)]
pub struct Test {
    /// Generator command line; empty for manual tests.
    pub cmd: String,
    pub points: Option<f64>,
    pub sample: bool,
}

#[derive(Clone, Debug, Default)]
pub struct TestSet {
    pub name: String,
    /// Milliseconds.
    pub time_limit: i64,
    /// Bytes.
    pub memory_limit: i64,
    /// printf-style, 1-indexed.
    pub input_path_pattern: String,
    pub answer_path_pattern: String,
    pub tests: Vec<Test>,
}

#[derive(Clone, Debug, Default)]
pub struct Problem {
    pub test_sets: Vec<TestSet>,
    pub executables: Vec<Executable>,
    pub solutions: Vec<Solution>,
}

impl Problem {
    /// The solution tagged `main`, used to generate reference answers.
    pub fn main_solution(&self) -> Option<&Solution> {
        self.solutions.iter().find(|solution| solution.tag == "main")
    }
}

fn attribute(attributes: &[OwnedAttribute], name: &str) -> Option<String> {
    attributes
        .iter()
        .find(|attr| attr.name.local_name == name)
        .map(|attr| attr.value.clone())
}

fn parse_source(attributes: &[OwnedAttribute]) -> FileSource {
    FileSource {
        path: attribute(attributes, "path").unwrap_or_default(),
        kind: attribute(attributes, "type").unwrap_or_default(),
    }
}

pub fn parse_problem(reader: impl Read) -> anyhow::Result<Problem> {
    let parser = EventReader::new(reader);
    let mut problem = Problem::default();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    for event in parser {
        match event.context("cannot parse problem.xml")? {
            XmlEvent::StartElement {
                name, attributes, ..
            } => {
                path.push(name.local_name.clone());
                text.clear();
                match path_str(&path).as_str() {
                    "problem/judging/testset" => {
                        problem.test_sets.push(TestSet {
                            name: attribute(&attributes, "name").unwrap_or_default(),
                            ..Default::default()
                        });
                    }
                    "problem/judging/testset/tests/test" => {
                        let test = Test {
                            cmd: attribute(&attributes, "cmd").unwrap_or_default(),
                            points: attribute(&attributes, "points")
                                .and_then(|value| value.parse().ok()),
                            sample: attribute(&attributes, "sample")
                                .map(|value| value == "true")
                                .unwrap_or(false),
                        };
                        if let Some(test_set) = problem.test_sets.last_mut() {
                            test_set.tests.push(test);
                        }
                    }
                    "problem/files/executables/executable" => {
                        problem.executables.push(Executable::default());
                    }
                    "problem/files/executables/executable/source" => {
                        if let Some(executable) = problem.executables.last_mut() {
                            executable.source = Some(parse_source(&attributes));
                        }
                    }
                    "problem/assets/solutions/solution" => {
                        problem.solutions.push(Solution {
                            tag: attribute(&attributes, "tag").unwrap_or_default(),
                            ..Default::default()
                        });
                    }
                    "problem/assets/solutions/solution/source" => {
                        if let Some(solution) = problem.solutions.last_mut() {
                            solution.source = Some(parse_source(&attributes));
                        }
                    }
                    _ => {}
                }
            }
            XmlEvent::Characters(data) => text.push_str(&data),
            XmlEvent::EndElement { .. } => {
                if let Some(test_set) = problem.test_sets.last_mut() {
                    match path_str(&path).as_str() {
                        "problem/judging/testset/time-limit" => {
                            test_set.time_limit = text.trim().parse().unwrap_or(0);
                        }
                        "problem/judging/testset/memory-limit" => {
                            test_set.memory_limit = text.trim().parse().unwrap_or(0);
                        }
                        "problem/judging/testset/input-path-pattern" => {
                            test_set.input_path_pattern = text.trim().to_owned();
                        }
                        "problem/judging/testset/answer-path-pattern" => {
                            test_set.answer_path_pattern = text.trim().to_owned();
                        }
                        _ => {}
                    }
                }
                path.pop();
                text.clear();
            }
            _ => {}
        }
    }
    Ok(problem)
}

fn path_str(path: &[String]) -> String {
    path.join("/")
}

pub fn read_problem_config(path: &Path) -> anyhow::Result<Problem> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    parse_problem(std::io::BufReader::new(file))
}

/// Renders a printf-style path pattern like `tests/%02d` for a
/// 1-indexed test number.
pub fn format_pattern(pattern: &str, index: usize) -> String {
    let mut result = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            result.push(c);
            continue;
        }
        let mut width = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_digit() {
                width.push(next);
                chars.next();
            } else {
                break;
            }
        }
        match chars.next() {
            Some('d') => {
                let pad: usize = width.trim_start_matches('0').parse().unwrap_or(0);
                if width.starts_with('0') && pad > 0 {
                    result.push_str(&format!("{:0pad$}", index, pad = pad));
                } else {
                    result.push_str(&format!("{}", index));
                }
            }
            Some('%') => result.push('%'),
            Some(other) => {
                result.push('%');
                result.push_str(&width);
                result.push(other);
            }
            None => result.push('%'),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBLEM_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<problem short-name="a-plus-b">
  <judging>
    <testset name="tests">
      <time-limit>1000</time-limit>
      <memory-limit>268435456</memory-limit>
      <test-count>2</test-count>
      <input-path-pattern>tests/%02d</input-path-pattern>
      <answer-path-pattern>tests/%02d.a</answer-path-pattern>
      <tests>
        <test method="manual" sample="true"/>
        <test cmd="gen 1 100" points="5"/>
      </tests>
    </testset>
  </judging>
  <files>
    <executables>
      <executable>
        <source path="files/gen.cpp" type="cpp.g++17"/>
      </executable>
    </executables>
  </files>
  <assets>
    <solutions>
      <solution tag="main">
        <source path="solutions/solve.cpp" type="cpp.g++17"/>
      </solution>
      <solution tag="wrong-answer">
        <source path="solutions/wrong.cpp" type="cpp.g++17"/>
      </solution>
    </solutions>
  </assets>
</problem>"#;

    #[test]
    fn test_parse_problem() {
        let problem = parse_problem(PROBLEM_XML.as_bytes()).unwrap();
        assert_eq!(problem.test_sets.len(), 1);
        let test_set = &problem.test_sets[0];
        assert_eq!(test_set.name, "tests");
        assert_eq!(test_set.time_limit, 1000);
        assert_eq!(test_set.memory_limit, 268435456);
        assert_eq!(test_set.input_path_pattern, "tests/%02d");
        assert_eq!(test_set.answer_path_pattern, "tests/%02d.a");
        assert_eq!(test_set.tests.len(), 2);
        assert!(test_set.tests[0].sample);
        assert!(test_set.tests[0].cmd.is_empty());
        assert_eq!(test_set.tests[1].cmd, "gen 1 100");
        assert_eq!(test_set.tests[1].points, Some(5.0));

        assert_eq!(problem.executables.len(), 1);
        let source = problem.executables[0].source.as_ref().unwrap();
        assert_eq!(source.path, "files/gen.cpp");
        assert_eq!(source.kind, "cpp.g++17");

        let main = problem.main_solution().unwrap();
        assert_eq!(main.source.as_ref().unwrap().path, "solutions/solve.cpp");
    }

    #[test]
    fn test_format_pattern() {
        assert_eq!(format_pattern("tests/%02d", 1), "tests/01");
        assert_eq!(format_pattern("tests/%02d.a", 12), "tests/12.a");
        assert_eq!(format_pattern("tests/%d", 7), "tests/7");
        assert_eq!(format_pattern("tests/%03d", 145), "tests/145");
        assert_eq!(format_pattern("t%%d", 1), "t%d");
    }
}
