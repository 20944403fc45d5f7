pub mod candidate_ranker;

pub use candidate_ranker::CandidateRanker;
