// nncheck — access analysis and checking for compiled network programs
//
// Library root. Front end (lexer → parser → listing), analysis stages
// (partition → access → history → analysis), then checks, queries and dumps.

pub mod access;
pub mod analysis;
pub mod ast;
pub mod caps;
pub mod diag;
pub mod dump;
pub mod history;
pub mod id;
pub mod ir;
pub mod lexer;
pub mod listing;
pub mod parser;
pub mod partition;
pub mod query;
pub mod verify;
