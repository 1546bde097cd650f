use std::collections::BTreeSet;

/// Items attributable to a single tax year.
pub trait GetYear {
    fn get_year(&self) -> i32;
}

pub trait CheckYearsExt {
    /// All tax years present, in ascending order.
    fn get_years(&self) -> BTreeSet<i32>;

    /// `Ok` when `year` is present, otherwise the years that are.
    fn check_year(&self, year: i32) -> Result<(), BTreeSet<i32>>;
}

/// Blanket implementation for every slice whose items implement `GetYear`.
impl<T> CheckYearsExt for [T]
where
    T: GetYear,
{
    fn get_years(&self) -> BTreeSet<i32> {
        self.iter().map(|item| item.get_year()).collect()
    }

    fn check_year(&self, year: i32) -> Result<(), BTreeSet<i32>> {
        let years = self.get_years();

        if years.contains(&year) {
            Ok(())
        } else {
            Err(years)
        }
    }
}
