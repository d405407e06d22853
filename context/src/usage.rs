/// Size accounting for a prepared context, for status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextUsage {
    /// Characters in the prepared message list.
    pub used_chars: usize,
    /// Configured ceiling.
    pub budget_chars: usize,
    /// Assistant messages replaced by their prose.
    pub collapsed_messages: usize,
    /// Files rendered into the context.
    pub relevant_files: usize,
}

impl ContextUsage {
    /// Usage as a percentage (0.0 - 100.0).
    #[must_use]
    pub fn percentage(&self) -> f32 {
        if self.budget_chars == 0 {
            0.0
        } else {
            (self.used_chars as f32 / self.budget_chars as f32) * 100.0
        }
    }

    /// Format for a status line: "2.1k / 200k (1%)"
    #[must_use]
    pub fn format_compact(&self) -> String {
        fn format_k(n: usize) -> String {
            if n >= 1_000_000 {
                format!("{:.1}M", n as f32 / 1_000_000.0)
            } else if n >= 1000 {
                format!("{:.1}k", n as f32 / 1000.0)
            } else {
                n.to_string()
            }
        }

        let pct = self.percentage();
        let mut out = format!(
            "{} / {} ({:.0}%)",
            format_k(self.used_chars),
            format_k(self.budget_chars),
            pct
        );
        if self.relevant_files > 0 {
            out.push_str(&format!(" [{}F]", self.relevant_files));
        }
        if self.collapsed_messages > 0 {
            out.push_str(&format!(" [{}C]", self.collapsed_messages));
        }
        out
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(used: usize, budget: usize) -> ContextUsage {
        ContextUsage {
            used_chars: used,
            budget_chars: budget,
            collapsed_messages: 0,
            relevant_files: 0,
        }
    }

    #[test]
    fn percentage_handles_zero_budget() {
        assert!(usage(10, 0).percentage().abs() < f32::EPSILON);
        assert!((usage(50, 200).percentage() - 25.0).abs() < 0.01);
    }

    #[test]
    fn format_compact_includes_markers() {
        assert_eq!(usage(2100, 200_000).format_compact(), "2.1k / 200.0k (1%)");
        let mut u = usage(500, 1000);
        u.relevant_files = 2;
        u.collapsed_messages = 3;
        assert_eq!(u.format_compact(), "500 / 1.0k (50%) [2F] [3C]");
    }
}
