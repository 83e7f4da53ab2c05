mod ufs;
mod utils;
