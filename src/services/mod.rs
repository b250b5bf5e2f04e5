pub mod catalog;
pub mod executor;
pub mod orchestrator;
pub mod payroll;
pub mod planner;
pub mod prober;
pub mod seeder;
