//! Motion detection and fan-out for live video streams.
//!
//! Frames arrive through a [`pipeline::stream_session::StreamChannel`], run
//! through a background model and motion detector, get their moving regions
//! outlined and are re-encoded for every viewer joined to a
//! [`broadcast::broadcast_hub::BroadcastHub`].

pub mod annotation {
    pub mod domain {
        pub mod frame_annotator;
    }
    pub mod infrastructure {
        pub mod rectangle_annotator;
    }
}

pub mod broadcast {
    pub mod broadcast_hub;
    pub mod domain {
        pub mod subscriber;
    }
    pub mod infrastructure {
        pub mod channel_subscriber;
    }
}

pub mod detection {
    pub mod domain {
        pub mod background_model;
        pub mod motion_detector;
        pub mod shared_background_model;
    }
    pub mod infrastructure;
}

pub mod pipeline {
    pub mod diagnostics;
    pub mod frame_pipeline;
    pub mod pipeline_logger;
    pub mod stream_session;
}

pub mod shared;

pub mod video {
    pub mod domain {
        pub mod frame_codec;
    }
    pub mod infrastructure {
        pub mod image_frame_codec;
    }
}
