pub mod background_model_factory;
pub mod gaussian_background_model;
pub mod knn_background_model;
