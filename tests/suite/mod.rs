mod adjudication;
mod cohorts;
mod correlation;
mod exports;
mod generation;
mod pharmacy;
