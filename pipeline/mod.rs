pub mod compare;
pub mod insights;
pub mod select;
pub mod table;
pub mod wrangle;
