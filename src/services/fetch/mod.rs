pub mod spotdl;
