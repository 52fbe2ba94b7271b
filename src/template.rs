use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHashMap;
use serde::Serialize;

pub const PLACEHOLDER: &str = "<VAR>";

// Signed integers and compound tokens such as IPs, versions and times are
// one run each.
static NUMERIC_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+-]?\d+(?:[._:-]\d+)*").unwrap());

/// A line split into its verbatim text and the numeric runs between it.
/// `skeleton` always holds one more element than `vars`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateParse<'a> {
    pub skeleton: Vec<&'a str>,
    pub vars: Vec<&'a str>,
}

impl<'a> TemplateParse<'a> {
    pub fn parse(line: &'a str) -> TemplateParse<'a> {
        let mut skeleton = Vec::new();
        let mut vars = Vec::new();
        let mut last_index = 0;
        for mmatch in NUMERIC_RUN.find_iter(line) {
            skeleton.push(&line[last_index..mmatch.start()]);
            vars.push(mmatch.as_str());
            last_index = mmatch.end();
        }
        skeleton.push(&line[last_index..]);
        TemplateParse { skeleton, vars }
    }

    pub fn template(&self) -> String {
        self.skeleton.join(PLACEHOLDER)
    }

    /// Refills the placeholders in order, reproducing the parsed line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, text) in self.skeleton.iter().enumerate() {
            out.push_str(text);
            if let Some(var) = self.vars.get(i) {
                out.push_str(var);
            }
        }
        out
    }
}

pub fn extract_template(line: &str) -> String {
    TemplateParse::parse(line).template()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateEntry {
    pub id: usize,
    pub template: String,
    pub count: usize,
}

/// Occurrence count per distinct template, built in one pass over a corpus.
/// Template ids are dense and assigned in first-seen order.
#[derive(Debug, Default, Clone)]
pub struct TemplateFrequency {
    ids: FxHashMap<String, usize>,
    entries: Vec<TemplateEntry>,
    lines: usize,
}

impl TemplateFrequency {
    pub fn from_lines<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut freq = TemplateFrequency::default();
        for line in lines {
            freq.add(extract_template(line), 1);
        }
        freq
    }

    fn add(&mut self, template: String, count: usize) {
        self.lines += count;
        match self.ids.get(&template) {
            Some(&id) => self.entries[id].count += count,
            None => {
                let id = self.entries.len();
                self.ids.insert(template.clone(), id);
                self.entries.push(TemplateEntry {
                    id,
                    template,
                    count,
                });
            }
        }
    }

    pub fn count(&self, template: &str) -> usize {
        self.ids
            .get(template)
            .map_or(0, |&id| self.entries[id].count)
    }

    pub fn id(&self, template: &str) -> Option<usize> {
        self.ids.get(template).copied()
    }

    /// Number of distinct templates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of lines tallied.
    pub fn total_lines(&self) -> usize {
        self.lines
    }

    /// Entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = &TemplateEntry> {
        self.entries.iter()
    }

    /// The `k` most frequent templates; ties keep first-seen order.
    pub fn top(&self, k: usize) -> Vec<&TemplateEntry> {
        let mut sorted: Vec<&TemplateEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| b.count.cmp(&a.count).then(a.id.cmp(&b.id)));
        sorted.truncate(k);
        sorted
    }
}

impl FromIterator<(String, usize)> for TemplateFrequency {
    fn from_iter<T: IntoIterator<Item = (String, usize)>>(iter: T) -> Self {
        let mut freq = TemplateFrequency::default();
        for (template, count) in iter {
            freq.add(template, count);
        }
        freq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_numbers_are_one_token() {
        assert_eq!(
            extract_template("conn 10.0.0.1:8080 v1.2.3 at 12:30:01 delta -5"),
            "conn <VAR> v<VAR> at <VAR> delta <VAR>"
        );
    }

    #[test]
    fn placeholder_count_matches_numeric_runs() {
        let line = "blk_-123 size 4096 from 10.1.1.2 took 0.5s retries=3";
        let parse = TemplateParse::parse(line);
        assert_eq!(parse.vars, vec!["-123", "4096", "10.1.1.2", "0.5", "3"]);
        assert_eq!(parse.template().matches(PLACEHOLDER).count(), 5);
        assert_eq!(
            parse.skeleton.concat(),
            "blk_ size  from  took s retries="
        );
        assert_eq!(parse.render(), line);
    }

    #[test]
    fn line_without_numbers_is_its_own_template() {
        let parse = TemplateParse::parse("server started");
        assert!(parse.vars.is_empty());
        assert_eq!(parse.template(), "server started");
    }

    #[test]
    fn frequency_keys_on_exact_template() {
        let freq = TemplateFrequency::from_lines(vec![
            "took 5 ms",
            "took 17 ms",
            "took 5  ms",
            "done",
        ]);
        assert_eq!(freq.len(), 3);
        assert_eq!(freq.count("took <VAR> ms"), 2);
        assert_eq!(freq.count("took <VAR>  ms"), 1);
        assert_eq!(freq.id("done"), Some(2));
        assert_eq!(freq.total_lines(), 4);
    }

    #[test]
    fn top_orders_by_count_then_first_seen() {
        let freq: TemplateFrequency = vec![
            ("a".to_string(), 2),
            ("b".to_string(), 5),
            ("c".to_string(), 2),
        ]
        .into_iter()
        .collect();
        let top: Vec<&str> = freq.top(3).iter().map(|e| e.template.as_str()).collect();
        assert_eq!(top, vec!["b", "a", "c"]);
    }
}
