pub mod participant_token;
