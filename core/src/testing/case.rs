use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    path::{Path, PathBuf},
};

use lazy_regex::Regex;

use super::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Testcase {
    pub name: String,
    pub input: Vec<u8>,
    /// `None` for cases only usable for differential runs.
    pub expected: Option<Vec<u8>>,
}

impl Testcase {
    pub fn new(
        name: impl Into<String>,
        input: impl Into<Vec<u8>>,
        expected: Option<impl Into<Vec<u8>>>,
    ) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            expected: expected.map(Into::into),
        }
    }
}

/// File naming convention for cases, e.g. `%s.%e` or `case-%s.%e`.
///
/// `%s` stands for the case name, `%e` for the extension (`in`, `out` or
/// `ans`) and `%%` for a literal `%`.
#[derive(Debug, Clone)]
pub struct CaseFormat {
    fmt: String,
    regex: Regex,
}

impl CaseFormat {
    pub const DEFAULT: &str = "%s.%e";
    pub const INPUT_EXT: &str = "in";
    pub const OUTPUT_EXT: &str = "out";

    pub fn parse(fmt: &str) -> Result<Self> {
        let invalid = |why| Error::InvalidFormat(fmt.to_owned(), why);
        if fmt.contains('/') {
            return Err(invalid("must not contain '/'"));
        }

        let mut pattern = String::from("^");
        let (mut n_name, mut n_ext) = (0, 0);
        let mut lit = String::new();
        let mut chars = fmt.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                lit.push(c);
                continue;
            }
            let group = match chars.next() {
                Some('%') => {
                    lit.push('%');
                    continue;
                }
                Some('s') => {
                    n_name += 1;
                    "(?P<name>.+)"
                }
                Some('e') => {
                    n_ext += 1;
                    "(?P<ext>in|out|ans)"
                }
                _ => return Err(invalid("unknown directive after '%'")),
            };
            pattern += &escape(&std::mem::take(&mut lit));
            pattern += group;
        }
        pattern += &escape(&lit);
        pattern.push('$');

        if n_name != 1 || n_ext != 1 {
            return Err(invalid("must contain '%s' and '%e' exactly once"));
        }
        let regex = Regex::new(&pattern).map_err(|_| invalid("cannot be compiled"))?;
        Ok(Self {
            fmt: fmt.to_owned(),
            regex,
        })
    }

    /// Splits a file name into (case name, extension).
    pub fn match_filename<'a>(&self, filename: &'a str) -> Option<(&'a str, &'a str)> {
        let caps = self.regex.captures(filename)?;
        Some((caps.name("name")?.as_str(), caps.name("ext")?.as_str()))
    }

    pub fn filename(&self, name: &str, ext: &str) -> String {
        let mut s = String::new();
        let mut chars = self.fmt.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                s.push(c);
                continue;
            }
            match chars.next() {
                Some('s') => s += name,
                Some('e') => s += ext,
                Some(other) => s.push(other),
                None => {}
            }
        }
        s
    }

    pub fn path(&self, dir: impl AsRef<Path>, name: &str, ext: &str) -> PathBuf {
        dir.as_ref().join(self.filename(name, ext))
    }
}

fn escape(lit: &str) -> String {
    let mut s = String::with_capacity(lit.len());
    for c in lit.chars() {
        if r"\.+*?()|[]{}^$#&-~".contains(c) {
            s.push('\\');
        }
        s.push(c);
    }
    s
}

impl fmt::Display for CaseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fmt)
    }
}

/// Ordered cases with unique names.
#[derive(Debug, Clone, Default)]
pub struct CaseRepository {
    cases: Vec<Testcase>,
}

#[derive(Default)]
struct FilePair {
    input: Option<PathBuf>,
    output: Option<PathBuf>,
}

impl CaseRepository {
    pub fn from_cases(cases: Vec<Testcase>) -> Result<Self> {
        let mut seen = HashSet::new();
        for c in &cases {
            if !seen.insert(c.name.as_str()) {
                return Err(Error::DuplicateCase(c.name.clone()));
            }
        }
        Ok(Self { cases })
    }

    /// Loads the cases of `dir` and of its immediate subdirectories.
    ///
    /// Cases found in a subdirectory are named `<subdir>_<name>`. Top-level
    /// files come first, then subdirectories in name order.
    pub fn load(dir: impl AsRef<Path>, format: &CaseFormat) -> Result<Self> {
        let dir = dir.as_ref();
        let mut cases = Self::scan(dir, "", format)?;

        let mut subdirs: Vec<_> = fsutil::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter(|e| !fsutil::is_backup_or_hidden(&e.file_name().to_string_lossy()))
            .map(|e| e.path())
            .collect();
        subdirs.sort();

        for sub in subdirs {
            let prefix = format!("{}_", sub.file_name().unwrap_or_default().to_string_lossy());
            cases.extend(Self::scan(&sub, &prefix, format)?);
        }
        log::debug!("Loaded {} cases from {}", cases.len(), dir.display());
        Self::from_cases(cases)
    }

    fn scan(dir: &Path, prefix: &str, format: &CaseFormat) -> Result<Vec<Testcase>> {
        let mut pairs: BTreeMap<String, FilePair> = BTreeMap::new();

        for path in fsutil::list_files_sorted(dir)? {
            let filename = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if filename == fsutil::DirLock::FILENAME {
                continue;
            }
            if fsutil::is_backup_or_hidden(&filename) {
                log::warn!("Ignored a backup file: {}", path.display());
                continue;
            }
            let Some((name, ext)) = format.match_filename(&filename) else {
                log::debug!("Not a case file: {}", path.display());
                continue;
            };
            let pair = pairs.entry(name.to_owned()).or_default();
            let slot = if ext == CaseFormat::INPUT_EXT {
                &mut pair.input
            } else {
                &mut pair.output
            };
            if let Some(prev) = slot {
                log::warn!(
                    "Ignored {}: {} is already used for the same case",
                    path.display(),
                    prev.display()
                );
                continue;
            }
            *slot = Some(path);
        }

        let mut cases = Vec::with_capacity(pairs.len());
        for (name, pair) in pairs {
            let Some(input) = pair.input else {
                if let Some(output) = pair.output {
                    log::warn!("Output without input is skipped: {}", output.display());
                }
                continue;
            };
            let expected = pair.output.map(fsutil::read).transpose()?;
            cases.push(Testcase {
                name: format!("{}{}", prefix, name),
                input: fsutil::read(input)?,
                expected,
            });
        }
        Ok(cases)
    }

    pub fn cases(&self) -> &[Testcase] {
        &self.cases
    }

    pub fn into_cases(self) -> Vec<Testcase> {
        self.cases
    }

    pub fn get(&self, name: &str) -> Option<&Testcase> {
        self.cases.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Testcase> {
        self.cases.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn format_parse_and_match() {
        let f = CaseFormat::parse("%s.%e").unwrap();
        assert_eq!(f.match_filename("sample-1.in"), Some(("sample-1", "in")));
        assert_eq!(f.match_filename("a.b.ans"), Some(("a.b", "ans")));
        assert_eq!(f.match_filename("sample-1.txt"), None);
        assert_eq!(f.filename("x", "out"), "x.out");

        let f = CaseFormat::parse("case%%%s_%e.txt").unwrap();
        assert_eq!(f.match_filename("case%7_in.txt"), Some(("7", "in")));
        assert_eq!(f.filename("7", "in"), "case%7_in.txt");
        assert_eq!(f.path("data", "7", "out"), Path::new("data/case%7_out.txt"));
    }

    #[test]
    fn format_rejects_bad_strings() {
        for bad in ["%s/%e", "%s", "%e", "%s.%s.%e", "%s.%x"] {
            assert!(
                matches!(CaseFormat::parse(bad), Err(Error::InvalidFormat(..))),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn from_cases_rejects_duplicates() {
        let c = |n: &str| Testcase::new(n, "", None::<&str>);
        assert!(CaseRepository::from_cases(vec![c("a"), c("b")]).is_ok());
        assert!(matches!(
            CaseRepository::from_cases(vec![c("a"), c("b"), c("a")]),
            Err(Error::DuplicateCase(name)) if name == "a"
        ));
    }

    #[test]
    fn load_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let write = |p: &str, s: &str| fsutil::write_with_mkdir(d.join(p), s).unwrap();
        write("b.in", "2\n");
        write("b.out", "4\n");
        write("a.in", "1\n");
        write("a.ans", "2\n");
        write("a.in~", "backup\n");
        write("c.in", "3\n");
        write("orphan.out", "9\n");
        write("notes.txt", "");
        write("secret/01.in", "5\n");
        write("secret/01.out", "10\n");
        write("sample/1.in", "6\n");
        write("sample/1.out", "12\n");

        let repo = CaseRepository::load(d, &CaseFormat::parse("%s.%e").unwrap()).unwrap();
        let names: Vec<_> = repo.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c", "sample_1", "secret_01"]);

        let a = repo.get("a").unwrap();
        assert_eq!(a.input, b"1\n");
        assert_eq!(a.expected.as_deref(), Some(&b"2\n"[..]));
        assert_eq!(repo.get("c").unwrap().expected, None);
        assert_eq!(repo.get("secret_01").unwrap().expected.as_deref(), Some(&b"10\n"[..]));
    }

    #[test]
    fn load_missing_directory_is_a_user_error() {
        let err = CaseRepository::load(
            "/definitely/not/here",
            &CaseFormat::parse(CaseFormat::DEFAULT).unwrap(),
        )
        .unwrap_err();
        assert!(!err.is_fatal());
    }
}
