mod common;
mod http;
mod limits;
mod scripts;
