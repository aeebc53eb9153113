use std::collections::BTreeMap;

use super::BencodeValue;
use crate::error::{DrizzleError, Result};

/// Decode bencoded data into a BencodeValue
pub fn decode(data: &[u8]) -> Result<BencodeValue> {
    let mut parser = Parser { data, pos: 0 };
    let value = parser.value()?;
    Ok(value)
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn value(&mut self) -> Result<BencodeValue> {
        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(),
            b'd' => self.dict(),
            b'0'..=b'9' => Ok(BencodeValue::String(self.byte_string()?)),
            c => Err(DrizzleError::BencodeError(format!(
                "Invalid bencode token: {}",
                c as char
            ))),
        }
    }

    fn integer(&mut self) -> Result<BencodeValue> {
        self.pos += 1; // 'i'
        let digits = self.take_until(b'e', "Unterminated integer")?;

        let num = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| DrizzleError::BencodeError("Invalid integer".to_string()))?;

        Ok(BencodeValue::Integer(num))
    }

    fn byte_string(&mut self) -> Result<Vec<u8>> {
        let digits = self.take_until(b':', "Invalid string length")?;

        let len = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| DrizzleError::BencodeError("Invalid string length".to_string()))?;

        if self.pos + len > self.data.len() {
            return Err(DrizzleError::BencodeError(
                "String length exceeds data".to_string(),
            ));
        }

        let string = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(string)
    }

    fn list(&mut self) -> Result<BencodeValue> {
        self.pos += 1; // 'l'
        let mut list = Vec::new();

        while self.peek_or("Unterminated list")? != b'e' {
            list.push(self.value()?);
        }
        self.pos += 1; // 'e'

        Ok(BencodeValue::List(list))
    }

    fn dict(&mut self) -> Result<BencodeValue> {
        self.pos += 1; // 'd'
        let mut dict = BTreeMap::new();

        while self.peek_or("Unterminated dictionary")? != b'e' {
            // Keys must be byte strings
            if !self.peek()?.is_ascii_digit() {
                return Err(DrizzleError::BencodeError(
                    "Dictionary key must be a string".to_string(),
                ));
            }
            let key = self.byte_string()?;
            let value = self.value()?;
            dict.insert(key, value);
        }
        self.pos += 1; // 'e'

        Ok(BencodeValue::Dict(dict))
    }

    fn peek(&self) -> Result<u8> {
        self.peek_or("Unexpected end of input")
    }

    fn peek_or(&self, message: &str) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| DrizzleError::BencodeError(message.to_string()))
    }

    fn take_until(&mut self, delimiter: u8, message: &str) -> Result<&'a [u8]> {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != delimiter {
            self.pos += 1;
        }

        if self.pos >= self.data.len() {
            return Err(DrizzleError::BencodeError(message.to_string()));
        }

        let span = &self.data[start..self.pos];
        self.pos += 1; // step over the delimiter
        Ok(span)
    }
}
