use std::fmt::{self, Write};

/// A plain-text table with left-aligned, space-separated columns. Header
/// cells never contain whitespace so `awk` can split the output.
pub(crate) struct Table {
    header: Vec<&'static str>,
    body: Vec<Vec<String>>,
    print_header: bool,
}

impl Table {
    pub(crate) fn new(header: &[&'static str]) -> Table {
        debug_assert!(
            header.iter().all(|h| !h.contains(char::is_whitespace)),
            "table header must not contain whitespace"
        );

        Table {
            header: header.to_vec(),
            body: Vec::new(),
            print_header: true,
        }
    }

    pub(crate) fn print_header(&mut self, print_header: bool) {
        self.print_header = print_header;
    }

    /// Missing cells are left blank and surplus cells dropped.
    pub(crate) fn add_row(&mut self, mut row: Vec<String>) {
        row.resize(self.header.len(), String::new());

        self.body.push(row);
    }

    fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.header.iter().map(|h| h.len()).collect();

        for row in &self.body {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        widths
    }
}

fn write_row<S: AsRef<str>>(f: &mut fmt::Formatter<'_>, widths: &[usize], row: &[S]) -> fmt::Result {
    let last = row.len().saturating_sub(1);

    for (i, cell) in row.iter().enumerate() {
        if i == last {
            // No trailing padding on the last column.
            f.write_str(cell.as_ref())?;
        } else {
            write!(f, "{:<width$}  ", cell.as_ref(), width = widths[i])?;
        }
    }

    f.write_char('\n')
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let widths = self.column_widths();

        if self.print_header {
            write_row(f, &widths, &self.header)?;
        }

        for row in &self.body {
            write_row(f, &widths, row)?;
        }

        Ok(())
    }
}

pub(crate) trait IntoTable: Into<Table> + Sized {
    fn into_table(self) -> Table {
        self.into()
    }
}

impl<T> IntoTable for T where T: Into<Table> + Sized {}
