pub mod employee;
pub mod payroll;
pub mod tenant;
