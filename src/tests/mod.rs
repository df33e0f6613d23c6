mod convergence;
mod utils;
