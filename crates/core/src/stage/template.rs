//! Placeholder expansion for stage command lines.

/// Values substituted for `{name}` placeholders in stage arguments.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    vars: Vec<(&'static str, String)>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a variable, replacing any previous value.
    pub fn set(&mut self, name: &'static str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        match self.vars.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.vars.push((name, value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Expands every known placeholder in `template`; unknown ones are kept.
    ///
    /// Substituted values are copied verbatim and never expanded again.
    pub fn expand(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open..];
            let known = tail
                .find('}')
                .and_then(|close| self.get(&tail[1..close]).map(|value| (close, value)));
            match known {
                Some((close, value)) => {
                    out.push_str(value);
                    rest = &tail[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}
