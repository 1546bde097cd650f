#[derive(Debug, Default)]
pub struct Stats {
    n_activity_rows: i32,
    n_trades: i32,
    n_cash_flows: i32,
    n_ignored_rows: i32,
    n_realizations: i32,
}

impl Stats {
    pub fn inc_activity(&mut self) {
        self.n_activity_rows += 1;
    }

    pub fn add_trades(&mut self, count: usize) {
        self.n_trades += count as i32;
    }

    pub fn add_cash_flows(&mut self, count: usize) {
        self.n_cash_flows += count as i32;
    }

    pub fn add_ignored(&mut self, count: usize) {
        self.n_ignored_rows += count as i32;
    }

    pub fn add_realizations(&mut self, count: usize) {
        self.n_realizations += count as i32;
    }

    pub fn activity_rows(&self) -> i32 {
        self.n_activity_rows
    }

    pub fn pretty_print(&self) {
        println!("{self:#?}");
        println!();
    }
}
